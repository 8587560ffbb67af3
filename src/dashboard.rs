//! Dashboard views over the store and the HTTP routes that serve them.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::history::{stats, HistoryStats};
use crate::memo::Memo;
use crate::notify::{ChangeNotifier, NAV_PRICES_TOPIC};
use crate::observability::env_value;
use crate::pivot::{observations_from_records, pivot, PivotResult, DEFAULT_MAX_SERIES};
use crate::ranking::{rank, top_movers, RankedChanges, DEFAULT_RANK_SIZE, TOP_MOVERS_LIMIT};
use crate::records::{
    filter_records, normalize, normalize_changes, parse_iso_date, snapshot_for_date,
    ChangeDirection, FundHistoryPoint, NavChangeRecord, NavRecord, ScrapeRun, TableSort,
};
use crate::refresh::RefreshTracker;
use crate::store::{NavStore, StoreError, DEFAULT_CHANGES_LIMIT};
use crate::summary::{summarize, Summary, DEFAULT_EXPECTED_FUNDS};
use crate::watchlist::{Watchlist, WatchlistError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    /// Fixed universe size for coverage. `None` uses the distinct fund count in the store.
    pub expected_funds: Option<i64>,
    pub rank_size: usize,
    pub movers_limit: usize,
    pub changes_limit: usize,
    pub max_series: usize,
    pub chart_row_limit: usize,
    pub dates_limit: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            expected_funds: None,
            rank_size: DEFAULT_RANK_SIZE,
            movers_limit: TOP_MOVERS_LIMIT,
            changes_limit: DEFAULT_CHANGES_LIMIT,
            max_series: DEFAULT_MAX_SERIES,
            chart_row_limit: 5_000,
            dates_limit: 60,
        }
    }
}

pub fn dashboard_config_from_env() -> DashboardConfig {
    let mut config = DashboardConfig::default();

    if let Some(expected) = env_value("NAVDASH_EXPECTED_FUNDS").and_then(|raw| raw.parse().ok()) {
        config.expected_funds = Some(expected);
    }
    if let Some(rank_size) = env_parse_usize("NAVDASH_RANK_SIZE") {
        config.rank_size = rank_size;
    }
    if let Some(changes_limit) = env_parse_usize("NAVDASH_CHANGES_LIMIT") {
        config.changes_limit = changes_limit;
    }
    if let Some(max_series) = env_parse_usize("NAVDASH_MAX_SERIES") {
        config.max_series = max_series;
    }

    config
}

fn env_parse_usize(key: &str) -> Option<usize> {
    env_value(key).and_then(|raw| raw.parse().ok())
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("data source unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error(transparent)]
    Watchlist(#[from] WatchlistError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl DashboardError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidDate(_) => StatusCode::BAD_REQUEST,
            Self::Watchlist(_) | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!(
            component = "dashboard_http",
            event = "http.error",
            status = status.as_u16(),
            error = %self
        );
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub generation: u64,
    /// Date the caller asked for; `None` follows the latest date in the store.
    pub requested_date: Option<NaiveDate>,
    /// Date of the snapshot actually shown.
    pub date: Option<NaiveDate>,
    pub available_dates: Vec<NaiveDate>,
    /// Table rows; narrowed by `search` on request.
    pub records: Vec<NavRecord>,
    /// Rows in `records` after any search.
    pub shown: usize,
    /// Rows in the full snapshot.
    pub total: usize,
    pub summary: Summary,
    pub ranked: RankedChanges,
    pub movers: Vec<NavChangeRecord>,
    pub last_scrape: Option<ScrapeRun>,
    pub excluded_rows: usize,
    pub excluded_changes: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundHistoryView {
    pub fund_abbr: String,
    pub points: Vec<FundHistoryPoint>,
    pub stats: Option<HistoryStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistView {
    pub entries: Vec<String>,
    pub date: Option<NaiveDate>,
    pub records: Vec<NavRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTriggerResponse {
    pub success: bool,
    pub message: String,
    pub options: Vec<String>,
}

pub fn scrape_not_configured() -> ScrapeTriggerResponse {
    ScrapeTriggerResponse {
        success: false,
        message: "Scraper endpoint not yet configured. You need to set up one of:".to_string(),
        options: vec![
            "1. Deploy scraper as a separate API (e.g., FastAPI)".to_string(),
            "2. Use GitHub Actions to run scraper on schedule".to_string(),
            "3. Deploy scraper as a serverless function (AWS Lambda, Google Cloud Function)"
                .to_string(),
        ],
    }
}

#[derive(Default)]
struct ViewCache {
    records: Option<Arc<[NavRecord]>>,
    changes: Option<Arc<[NavChangeRecord]>>,
    summary: Memo<NavRecord, i64, Summary>,
    ranked: Memo<NavChangeRecord, usize, RankedChanges>,
    movers: Memo<NavChangeRecord, usize, Vec<NavChangeRecord>>,
}

pub struct Dashboard {
    store: Arc<dyn NavStore>,
    config: DashboardConfig,
    tracker: RefreshTracker<DashboardView>,
    cache: Mutex<ViewCache>,
}

impl Dashboard {
    pub fn new(store: Arc<dyn NavStore>, config: DashboardConfig) -> Self {
        Self {
            store,
            config,
            tracker: RefreshTracker::new(),
            cache: Mutex::new(ViewCache::default()),
        }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn current(&self) -> Option<Arc<DashboardView>> {
        self.tracker.current()
    }

    /// Refetches and recomputes. A result that loses the race to a newer refresh is
    /// still returned to its caller but never replaces the published view.
    pub fn refresh(
        &self,
        requested_date: Option<NaiveDate>,
    ) -> Result<Arc<DashboardView>, DashboardError> {
        let ticket = self.tracker.begin();
        let view = match self.build_view(requested_date, ticket.generation()) {
            Ok(view) => Arc::new(view),
            Err(err) => {
                warn!(
                    component = "dashboard",
                    event = "dashboard.refresh.error",
                    generation = ticket.generation(),
                    error = %err
                );
                return Err(err);
            }
        };

        let published = self.tracker.publish(ticket, Arc::clone(&view));
        info!(
            component = "dashboard",
            event = "dashboard.refresh",
            generation = ticket.generation(),
            published,
            date = ?view.date,
            funds = view.summary.count,
            coverage_pct = view.summary.coverage_pct,
            excluded_rows = view.excluded_rows,
            excluded_changes = view.excluded_changes
        );
        Ok(view)
    }

    /// Published view for `requested_date`, recomputing when none matches.
    pub fn view_for(
        &self,
        requested_date: Option<NaiveDate>,
    ) -> Result<Arc<DashboardView>, DashboardError> {
        match self.current() {
            Some(view) if view.requested_date == requested_date => Ok(view),
            _ => self.refresh(requested_date),
        }
    }

    /// Whatever view is published, including a pinned date; refreshes only when none exists.
    pub fn current_or_refresh(&self) -> Result<Arc<DashboardView>, DashboardError> {
        match self.current() {
            Some(view) => Ok(view),
            None => self.refresh(None),
        }
    }

    pub fn chart(
        &self,
        fund_abbrs: &[String],
        max_series: Option<usize>,
    ) -> Result<PivotResult, DashboardError> {
        let rows = self
            .store
            .price_observations(fund_abbrs, self.config.chart_row_limit)?;
        let normalized = normalize(rows);
        let mut observations = observations_from_records(&normalized.records);

        let series_order: Vec<String> = if fund_abbrs.is_empty() {
            self.current()
                .map(|view| {
                    view.records
                        .iter()
                        .map(|record| record.fund_abbr.clone())
                        .collect()
                })
                .unwrap_or_default()
        } else {
            fund_abbrs.to_vec()
        };
        observations.sort_by_key(|obs| {
            series_order
                .iter()
                .position(|abbr| *abbr == obs.fund_abbr)
                .unwrap_or(usize::MAX)
        });

        Ok(pivot(
            &observations,
            max_series.unwrap_or(self.config.max_series),
        ))
    }

    pub fn fund_history(&self, fund_abbr: &str) -> Result<FundHistoryView, DashboardError> {
        let points = self.store.fund_history(fund_abbr)?;
        let stats = stats(&points);
        Ok(FundHistoryView {
            fund_abbr: fund_abbr.to_string(),
            points,
            stats,
        })
    }

    fn build_view(
        &self,
        requested_date: Option<NaiveDate>,
        generation: u64,
    ) -> Result<DashboardView, DashboardError> {
        let available_dates = self.store.available_dates(self.config.dates_limit)?;
        let date = match requested_date {
            Some(date) => Some(date),
            None => self.store.latest_date()?,
        };

        let (records, excluded_rows) = match date {
            Some(date) => {
                let normalized = normalize(self.store.prices_for_date(date)?);
                (
                    snapshot_for_date(&normalized.records, date),
                    normalized.excluded,
                )
            }
            None => (Vec::new(), 0),
        };

        let changes = normalize_changes(self.store.recent_changes(self.config.changes_limit)?);
        let expected_funds = self.expected_funds()?;
        let last_scrape = self.store.latest_scrape_run()?;

        let mut cache = self
            .cache
            .lock()
            .expect("dashboard cache lock should not be poisoned");
        let cache = &mut *cache;
        let records = reuse_if_unchanged(&mut cache.records, records);
        let change_records = reuse_if_unchanged(&mut cache.changes, changes.records);

        let summary = cache
            .summary
            .get_or_compute(&records, expected_funds, |records, expected| {
                summarize(records, *expected)
            })
            .clone();
        let ranked = cache
            .ranked
            .get_or_compute(&change_records, self.config.rank_size, |changes, n| {
                rank(changes, *n)
            })
            .clone();
        let movers = cache
            .movers
            .get_or_compute(&change_records, self.config.movers_limit, |changes, n| {
                top_movers(changes, *n)
            })
            .clone();

        if summary.low_coverage && summary.count > 0 {
            info!(
                component = "dashboard",
                event = "dashboard.low_coverage",
                count = summary.count,
                expected = summary.expected_count,
                coverage_pct = summary.coverage_pct
            );
        }

        Ok(DashboardView {
            generation,
            requested_date,
            date,
            available_dates,
            records: records.to_vec(),
            shown: records.len(),
            total: records.len(),
            summary,
            ranked,
            movers,
            last_scrape,
            excluded_rows,
            excluded_changes: changes.excluded,
            generated_at: Utc::now(),
        })
    }

    fn expected_funds(&self) -> Result<i64, StoreError> {
        if let Some(expected) = self.config.expected_funds {
            return Ok(expected);
        }
        let observed = self.store.distinct_fund_count()?;
        Ok(if observed > 0 {
            observed
        } else {
            DEFAULT_EXPECTED_FUNDS
        })
    }
}

/// Keeps the previous allocation when the refetched rows are identical, so the
/// memoized aggregates stay valid across no-op refreshes.
fn reuse_if_unchanged<T: PartialEq>(slot: &mut Option<Arc<[T]>>, fresh: Vec<T>) -> Arc<[T]> {
    if let Some(previous) = slot {
        if previous[..] == fresh[..] {
            return Arc::clone(previous);
        }
    }
    let fresh: Arc<[T]> = Arc::from(fresh);
    *slot = Some(Arc::clone(&fresh));
    fresh
}

/// Recomputes the published view whenever `nav_prices` changes, keeping any pinned date.
pub fn spawn_auto_refresh(dashboard: Arc<Dashboard>, notifier: &ChangeNotifier) -> JoinHandle<()> {
    let mut subscription = notifier.subscribe(NAV_PRICES_TOPIC);
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let pinned = dashboard.current().and_then(|view| view.requested_date);
            debug!(
                component = "dashboard",
                event = "dashboard.change_notified",
                kind = ?event.kind,
                pinned_date = ?pinned
            );
            let refreshed = Arc::clone(&dashboard);
            // Refresh failures are already logged; the last good view stays published.
            if let Err(DashboardError::Task(err)) =
                run_blocking(move || refreshed.refresh(pinned)).await
            {
                warn!(
                    component = "dashboard",
                    event = "dashboard.refresh.join_error",
                    error = %err
                );
            }
        }
    })
}

/// Runs store-bound work on the blocking pool, carrying the caller's tracing dispatcher.
async fn run_blocking<R, F>(work: F) -> Result<R, DashboardError>
where
    R: Send + 'static,
    F: FnOnce() -> Result<R, DashboardError> + Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    tokio::task::spawn_blocking(move || tracing::dispatcher::with_default(&dispatch, work)).await?
}

#[derive(Clone)]
struct DashboardAppState {
    dashboard: Arc<Dashboard>,
    watchlist: Arc<Mutex<Watchlist>>,
}

pub fn dashboard_router(dashboard: Arc<Dashboard>, watchlist: Arc<Mutex<Watchlist>>) -> Router {
    Router::new()
        .route("/dashboard", get(get_dashboard_html))
        .route("/dashboard/snapshot", get(get_dashboard_snapshot))
        .route("/dashboard/refresh", post(post_dashboard_refresh))
        .route("/dashboard/chart", get(get_dashboard_chart))
        .route("/funds/{abbr}/history", get(get_fund_history))
        .route("/watchlist", get(get_watchlist).delete(delete_watchlist))
        .route("/watchlist/{abbr}", post(post_watchlist_toggle))
        .route("/api/scrape", post(post_scrape))
        .with_state(DashboardAppState {
            dashboard,
            watchlist,
        })
}

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotQuery {
    pub date: Option<String>,
    /// Case-insensitive match on fund name or abbreviation.
    pub search: Option<String>,
    pub sort: Option<TableSort>,
}

impl SnapshotQuery {
    fn parsed_date(&self) -> Result<Option<NaiveDate>, DashboardError> {
        match self.date.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_iso_date(raw)
                .map(Some)
                .ok_or_else(|| DashboardError::InvalidDate(raw.to_string())),
        }
    }

    /// Table rows narrowed and ordered for this request. Aggregates stay over the full snapshot.
    fn apply_table(&self, view: &DashboardView) -> DashboardView {
        let mut out = view.clone();
        out.records = filter_records(
            &view.records,
            self.search.as_deref().unwrap_or_default(),
            self.sort.unwrap_or_default(),
        );
        out.shown = out.records.len();
        out
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChartQuery {
    /// Comma-separated fund identifiers.
    pub funds: Option<String>,
    pub max_series: Option<usize>,
}

impl ChartQuery {
    fn fund_list(&self) -> Vec<String> {
        self.funds
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|abbr| !abbr.is_empty())
            .map(str::to_string)
            .collect()
    }
}

async fn get_dashboard_html(
    State(state): State<DashboardAppState>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Html<String>, DashboardError> {
    let requested_date = query.parsed_date()?;
    let dashboard = Arc::clone(&state.dashboard);
    let view = run_blocking(move || dashboard.view_for(requested_date)).await?;
    let watched = state
        .watchlist
        .lock()
        .expect("watchlist lock should not be poisoned")
        .entries()
        .to_vec();
    Ok(Html(render_dashboard_html(
        &query.apply_table(&view),
        &watched,
    )))
}

async fn get_dashboard_snapshot(
    State(state): State<DashboardAppState>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<DashboardView>, DashboardError> {
    let requested_date = query.parsed_date()?;
    info!(
        component = "dashboard_http",
        event = "http.snapshot.request",
        requested_date = ?requested_date,
        search = ?query.search,
        sort = ?query.sort
    );
    let dashboard = Arc::clone(&state.dashboard);
    let view = run_blocking(move || dashboard.view_for(requested_date)).await?;
    Ok(Json(query.apply_table(&view)))
}

async fn post_dashboard_refresh(
    State(state): State<DashboardAppState>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<DashboardView>, DashboardError> {
    let requested_date = query.parsed_date()?;
    info!(
        component = "dashboard_http",
        event = "http.refresh.request",
        requested_date = ?requested_date
    );
    let dashboard = Arc::clone(&state.dashboard);
    let view = run_blocking(move || dashboard.refresh(requested_date)).await?;
    Ok(Json(query.apply_table(&view)))
}

async fn get_dashboard_chart(
    State(state): State<DashboardAppState>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<PivotResult>, DashboardError> {
    let funds = query.fund_list();
    info!(
        component = "dashboard_http",
        event = "http.chart.request",
        funds = funds.len(),
        max_series = ?query.max_series
    );
    let dashboard = Arc::clone(&state.dashboard);
    let max_series = query.max_series;
    let chart = run_blocking(move || dashboard.chart(&funds, max_series)).await?;
    Ok(Json(chart))
}

async fn get_fund_history(
    State(state): State<DashboardAppState>,
    Path(abbr): Path<String>,
) -> Result<Json<FundHistoryView>, DashboardError> {
    info!(
        component = "dashboard_http",
        event = "http.history.request",
        fund_abbr = %abbr
    );
    let dashboard = Arc::clone(&state.dashboard);
    let history = run_blocking(move || dashboard.fund_history(&abbr)).await?;
    Ok(Json(history))
}

async fn get_watchlist(
    State(state): State<DashboardAppState>,
) -> Result<Json<WatchlistView>, DashboardError> {
    let DashboardAppState {
        dashboard,
        watchlist,
    } = state;
    let view = run_blocking(move || {
        let view = dashboard.current_or_refresh()?;
        let watchlist = watchlist
            .lock()
            .expect("watchlist lock should not be poisoned");
        Ok(watchlist_view(&watchlist, &view))
    })
    .await?;
    Ok(Json(view))
}

async fn post_watchlist_toggle(
    State(state): State<DashboardAppState>,
    Path(abbr): Path<String>,
) -> Result<Json<WatchlistView>, DashboardError> {
    let DashboardAppState {
        dashboard,
        watchlist,
    } = state;
    let view = run_blocking(move || {
        let view = dashboard.current_or_refresh()?;
        let mut watchlist = watchlist
            .lock()
            .expect("watchlist lock should not be poisoned");
        let watched = watchlist.toggle(&abbr)?;
        info!(
            component = "dashboard_http",
            event = "http.watchlist.toggle",
            fund_abbr = %abbr,
            watched
        );
        Ok(watchlist_view(&watchlist, &view))
    })
    .await?;
    Ok(Json(view))
}

async fn delete_watchlist(
    State(state): State<DashboardAppState>,
) -> Result<Json<WatchlistView>, DashboardError> {
    let DashboardAppState {
        dashboard,
        watchlist,
    } = state;
    let view = run_blocking(move || {
        let view = dashboard.current_or_refresh()?;
        let mut watchlist = watchlist
            .lock()
            .expect("watchlist lock should not be poisoned");
        watchlist.clear()?;
        info!(
            component = "dashboard_http",
            event = "http.watchlist.clear"
        );
        Ok(watchlist_view(&watchlist, &view))
    })
    .await?;
    Ok(Json(view))
}

async fn post_scrape() -> impl IntoResponse {
    warn!(
        component = "dashboard_http",
        event = "scrape.trigger.not_configured"
    );
    (StatusCode::NOT_IMPLEMENTED, Json(scrape_not_configured()))
}

fn watchlist_view(watchlist: &Watchlist, view: &DashboardView) -> WatchlistView {
    WatchlistView {
        entries: watchlist.entries().to_vec(),
        date: view.date,
        records: watchlist.filter_records(&view.records),
    }
}

pub fn render_dashboard_html(view: &DashboardView, watched: &[String]) -> String {
    let summary = &view.summary;
    let date_label = view
        .date
        .map(|date| date.format("%b %-d, %Y").to_string())
        .unwrap_or_else(|| "No data".to_string());

    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>NAV Dashboard</title>\n");
    out.push_str("<style>body{margin:0;font-family:\"Inter\",\"Segoe UI\",sans-serif;background:linear-gradient(160deg,#eef4fb,#f6f7f9);color:#1c2430}.shell{max-width:1280px;margin:0 auto;padding:24px 18px}.hero{background:#fff;border-radius:14px;padding:18px 20px;box-shadow:0 6px 20px rgba(20,40,70,.08)}.hero h1{margin:0 0 6px;font-size:1.6rem}.meta{color:#5d6b7a;font-size:.9rem}.cards{display:grid;grid-template-columns:repeat(auto-fit,minmax(180px,1fr));gap:14px;margin-top:16px}.card{background:#fff;border-radius:12px;padding:16px;box-shadow:0 4px 14px rgba(20,40,70,.06)}.card p{margin:0}.card .value{font-size:1.7rem;font-weight:700;margin-top:6px}.card.low{border-left:4px solid #d9a400}.card.low .value{color:#b88a00}.grid{display:grid;grid-template-columns:2fr 1fr;gap:18px;margin-top:18px}table{width:100%;border-collapse:collapse;background:#fff;border-radius:12px;overflow:hidden}th{background:#18324a;color:#f2f6fa;text-align:left;font-size:.8rem;padding:9px 10px;text-transform:uppercase}td{padding:8px 10px;border-bottom:1px solid #e3e8ee;font-size:.86rem}.up{color:#138a4d}.down{color:#c0392b}.flat{color:#5d6b7a}.watched td:first-child::before{content:\"\\2605 \";color:#d9a400}ol{margin:0;padding-left:20px}li{padding:4px 0}@media (max-width:860px){.grid{grid-template-columns:1fr}}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");

    out.push_str("<section class=\"hero\"><h1>NAV Dashboard</h1><div class=\"meta\">");
    out.push_str("Public Mutual Fund Net Asset Values");
    if let Some(run) = &view.last_scrape {
        out.push_str(&format!(
            " &middot; Last updated: {}{}",
            escape_html(&run.timestamp.format("%Y-%m-%d %H:%M UTC").to_string()),
            if run.is_success() { " &#9989;" } else { "" }
        ));
    }
    out.push_str("</div></section>\n");

    out.push_str("<section class=\"cards\">");
    push_card(
        &mut out,
        &format!("Total Funds ({date_label})"),
        &summary.count.to_string(),
        None,
        false,
    );
    push_card(
        &mut out,
        "Coverage",
        &format!("{:.0}%", summary.coverage_pct),
        Some(&format!("{} of {}", summary.count, summary.expected_count)),
        summary.low_coverage,
    );
    push_card(&mut out, "Average NAV", &format_nav(summary.avg_nav), None, false);
    push_card(&mut out, "Highest NAV", &format_nav(summary.max_nav), None, false);
    push_card(&mut out, "Lowest NAV", &format_nav(summary.min_nav), None, false);
    out.push_str("</section>\n");

    out.push_str("<section class=\"grid\"><div>");
    out.push_str(&format!(
        "<p class=\"meta\" id=\"table-count\">Showing {} of {} funds</p>",
        view.shown, view.total
    ));
    out.push_str("<table id=\"nav-table\"><thead><tr><th>Fund</th><th>Abbr</th><th>NAV</th><th>Change</th><th>%</th></tr></thead><tbody>\n");
    for record in &view.records {
        let row_class = if watched.iter().any(|abbr| *abbr == record.fund_abbr) {
            " class=\"watched\""
        } else {
            ""
        };
        out.push_str(&format!("<tr{row_class}>"));
        out.push_str(&format!("<td>{}</td>", escape_html(&record.fund_name)));
        out.push_str(&format!("<td>{}</td>", escape_html(&record.fund_abbr)));
        out.push_str(&format!("<td>{:.4}</td>", record.nav));
        out.push_str(&format!(
            "<td>{}</td>",
            escape_html(record.change_abs.as_deref().unwrap_or("-"))
        ));
        out.push_str(&format!(
            "<td class=\"{}\">{}</td>",
            direction_class(record.direction()),
            escape_html(record.change_pct.as_deref().unwrap_or("-"))
        ));
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody></table></div><div>");

    push_change_list(&mut out, "Top Gainers", "No gainers", &view.ranked.gainers);
    push_change_list(&mut out, "Top Losers", "No losers", &view.ranked.losers);
    push_change_list(&mut out, "Biggest Moves", "No changes", &view.movers);

    out.push_str("</div></section>\n");
    out.push_str("</main></body></html>\n");
    out
}

fn push_card(out: &mut String, label: &str, value: &str, detail: Option<&str>, low: bool) {
    out.push_str(if low {
        "<div class=\"card low\">"
    } else {
        "<div class=\"card\">"
    });
    out.push_str(&format!("<p>{}</p>", escape_html(label)));
    out.push_str(&format!("<p class=\"value\">{}</p>", escape_html(value)));
    if let Some(detail) = detail {
        out.push_str(&format!("<p class=\"meta\">{}</p>", escape_html(detail)));
    }
    out.push_str("</div>");
}

fn push_change_list(out: &mut String, title: &str, empty: &str, changes: &[NavChangeRecord]) {
    out.push_str(&format!("<div class=\"card\"><p><b>{}</b></p>", escape_html(title)));
    if changes.is_empty() {
        out.push_str(&format!("<p class=\"meta\">{}</p></div>", escape_html(empty)));
        return;
    }
    out.push_str("<ol>");
    for change in changes {
        out.push_str(&format!(
            "<li>{} <span class=\"{}\">{}</span> <span class=\"meta\">{:.4} &rarr; {:.4}</span></li>",
            escape_html(&change.fund_abbr),
            direction_class(change.direction()),
            format_pct(change.change_pct),
            change.nav_old,
            change.nav_new
        ));
    }
    out.push_str("</ol></div>");
}

fn direction_class(direction: Option<ChangeDirection>) -> &'static str {
    match direction {
        Some(ChangeDirection::Up) => "up",
        Some(ChangeDirection::Down) => "down",
        Some(ChangeDirection::Flat) | None => "flat",
    }
}

fn format_nav(value: Option<f64>) -> String {
    value
        .map(|nav| format!("{nav:.4}"))
        .unwrap_or_else(|| "-".to_string())
}

fn format_pct(value: Option<f64>) -> String {
    match value {
        Some(pct) if pct > 0.0 => format!("+{pct:.2}%"),
        Some(pct) => format!("{pct:.2}%"),
        None => "-".to_string(),
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
