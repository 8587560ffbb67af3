//! NAV analytics dashboard crate.
//!
//! Reads daily mutual-fund NAV rows from the upstream SQLite store, normalizes them,
//! and derives the dashboard views:
//! - coverage and NAV summary for one snapshot date
//! - top gainers, losers and absolute movers over recent change rows
//! - date-by-fund chart pivot and per-fund history statistics
//! - a persisted favorite-fund watchlist and change-driven auto refresh

mod dashboard;
mod history;
mod memo;
mod notify;
mod observability;
mod pivot;
mod ranking;
mod records;
mod refresh;
mod store;
mod summary;
mod watchlist;

pub use dashboard::{
    dashboard_config_from_env, dashboard_router, render_dashboard_html, scrape_not_configured,
    spawn_auto_refresh, ChartQuery, Dashboard, DashboardConfig, DashboardError, DashboardView,
    FundHistoryView, ScrapeTriggerResponse, SnapshotQuery, WatchlistView,
};
pub use history::{stats as history_stats, HistoryStats};
pub use memo::Memo;
pub use notify::{
    spawn_change_watcher, ChangeEvent, ChangeKind, ChangeNotifier, Subscription,
    NAV_PRICES_TOPIC,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_store_opened, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError, LOG_FORMAT_ENV, LOG_LEVEL_ENV, LOG_TARGET_ENV,
};
pub use pivot::{
    observations_from_records, pivot, ChartRow, Observation, PivotResult, DEFAULT_MAX_SERIES,
};
pub use ranking::{rank, top_movers, RankedChanges, DEFAULT_RANK_SIZE, TOP_MOVERS_LIMIT};
pub use records::{
    filter_records, latest_snapshot, normalize, normalize_changes, parse_iso_date, parse_pct_text,
    snapshot_for_date, ChangeDirection, FundHistoryPoint, NavChangeRecord, NavRecord, Normalized,
    RawChangeRow, RawNavRow, ScrapeRun, TableSort,
};
pub use refresh::{RefreshTicket, RefreshTracker};
pub use store::{ensure_schema, NavStore, SqliteNavStore, StoreError, DEFAULT_CHANGES_LIMIT};
pub use summary::{summarize, Summary, DEFAULT_EXPECTED_FUNDS, LOW_COVERAGE_THRESHOLD_PCT};
pub use watchlist::{
    KeyValueError, KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore, Watchlist,
    WatchlistError, WATCHLIST_KEY,
};
