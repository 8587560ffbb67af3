use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use navdash::{
    dashboard_router, spawn_auto_refresh, spawn_change_watcher, ChangeNotifier, Dashboard,
    DashboardConfig, FundHistoryPoint, KeyValueStore, MemoryKeyValueStore, NavStore, RawChangeRow,
    RawNavRow, ScrapeRun, SqliteNavStore, StoreError, Watchlist, WATCHLIST_KEY,
};
use rusqlite::{params, Connection};
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct Fixture {
    _dir: TempDir,
    db_path: std::path::PathBuf,
    dashboard: Arc<Dashboard>,
    kv: Arc<MemoryKeyValueStore>,
    app: Router,
}

fn seed(path: &Path) {
    let store = SqliteNavStore::open(path).expect("store should open");
    drop(store);

    let conn = Connection::open(path).expect("seed connection should open");
    let prices: [(&str, &str, Option<f64>, Option<&str>, Option<&str>, &str); 5] = [
        ("Beta Fund", "BETA", Some(2.0), Some("0.0400"), Some("+2.04%"), "2025-03-03"),
        ("alpha fund", "ALPHA", Some(1.0), Some("-0.1000"), Some("-9.09%"), "2025-03-03"),
        ("Broken Fund", "BROKEN", None, None, None, "2025-03-03"),
        ("alpha fund", "ALPHA", Some(1.1), None, None, "2025-03-02"),
        ("Beta Fund", "BETA", Some(1.96), None, None, "2025-03-02"),
    ];
    for (name, abbr, nav, chg, chg_pct, date) in prices {
        conn.execute(
            "INSERT INTO nav_prices (fund_name, fund_abbr, nav, chg, chg_pct, date) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![name, abbr, nav, chg, chg_pct, date],
        )
        .expect("price row should insert");
    }

    let changes: [(&str, &str, f64, f64, Option<f64>); 3] = [
        ("alpha fund", "ALPHA", 1.1, 1.0, Some(-9.09)),
        ("Beta Fund", "BETA", 1.96, 2.0, Some(2.04)),
        ("Gamma", "GAMMA", 0.0, 1.0, None),
    ];
    for (name, abbr, old, new, pct) in changes {
        conn.execute(
            "INSERT INTO nav_changes (fund_name, fund_abbr, nav_old, nav_new, change, change_pct, date) VALUES (?1, ?2, ?3, ?4, ?5, ?6, '2025-03-03')",
            params![name, abbr, old, new, new - old, pct],
        )
        .expect("change row should insert");
    }

    conn.execute(
        "INSERT INTO scrape_runs (timestamp, status, row_count) VALUES ('2025-03-03T08:00:00Z', 'success', 3)",
        [],
    )
    .expect("scrape run should insert");
}

fn fixture() -> Fixture {
    let dir = TempDir::new().expect("temp dir should be created");
    let db_path = dir.path().join("nav.sqlite");
    seed(&db_path);

    let store: Arc<dyn NavStore> =
        Arc::new(SqliteNavStore::open(&db_path).expect("store should reopen"));
    let dashboard = Arc::new(Dashboard::new(store, DashboardConfig::default()));
    let kv = Arc::new(MemoryKeyValueStore::new());
    let kv_dyn: Arc<dyn KeyValueStore> = kv.clone();
    let watchlist = Arc::new(Mutex::new(Watchlist::load(kv_dyn)));
    let app = dashboard_router(Arc::clone(&dashboard), watchlist);

    Fixture {
        _dir: dir,
        db_path,
        dashboard,
        kv,
        app,
    }
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("request should be served");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    (status, String::from_utf8(body.to_vec()).expect("utf-8 body"))
}

async fn send_json(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let (status, text) = send(app, method, uri).await;
    (
        status,
        serde_json::from_str(&text).expect("body should be JSON"),
    )
}

fn abbrs(list: &Value) -> Vec<String> {
    list.as_array()
        .expect("array")
        .iter()
        .map(|item| item["fund_abbr"].as_str().expect("fund_abbr").to_string())
        .collect()
}

#[tokio::test]
async fn snapshot_uses_latest_date_and_excludes_invalid_rows() {
    let fx = fixture();
    let (status, json) = send_json(&fx.app, "GET", "/dashboard/snapshot").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["date"], "2025-03-03");
    assert_eq!(json["requested_date"], Value::Null);
    assert_eq!(abbrs(&json["records"]), vec!["ALPHA", "BETA"]);
    assert_eq!(json["excluded_rows"], 1);

    let summary = &json["summary"];
    assert_eq!(summary["count"], 2);
    assert_eq!(summary["expected_count"], 3);
    assert_eq!(summary["low_coverage"], true);
    assert_eq!(summary["min_nav"], 1.0);
    assert_eq!(summary["max_nav"], 2.0);
    assert_eq!(summary["avg_nav"], 1.5);

    assert_eq!(abbrs(&json["ranked"]["gainers"]), vec!["BETA"]);
    assert_eq!(abbrs(&json["ranked"]["losers"]), vec!["ALPHA"]);
    assert_eq!(abbrs(&json["movers"]), vec!["ALPHA", "BETA", "GAMMA"]);
    assert_eq!(json["movers"][2]["change_pct"], Value::Null);

    assert_eq!(json["last_scrape"]["status"], "success");
    assert_eq!(
        json["available_dates"],
        serde_json::json!(["2025-03-03", "2025-03-02"])
    );
}

#[tokio::test]
async fn snapshot_for_requested_date_and_invalid_date() {
    let fx = fixture();

    let (status, json) = send_json(&fx.app, "GET", "/dashboard/snapshot?date=2025-03-02").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["date"], "2025-03-02");
    assert_eq!(json["requested_date"], "2025-03-02");
    assert_eq!(json["summary"]["count"], 2);
    assert_eq!(json["excluded_rows"], 0);

    let (status, json) = send_json(&fx.app, "GET", "/dashboard/snapshot?date=03/02/2025").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]
        .as_str()
        .expect("error message")
        .contains("03/02/2025"));

    let (status, json) = send_json(&fx.app, "GET", "/dashboard/snapshot?date=2024-01-01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["summary"]["count"], 0);
    assert_eq!(json["summary"]["avg_nav"], Value::Null);
}

#[tokio::test]
async fn unpadded_date_row_does_not_hide_the_latest_snapshot() {
    let fx = fixture();
    let conn = Connection::open(&fx.db_path).expect("writer should open");
    conn.execute(
        "INSERT INTO nav_prices (fund_name, fund_abbr, nav, date) VALUES ('Bad Date', 'BAD', 3.0, '2025-3-5')",
        [],
    )
    .expect("malformed row should insert");

    let view = fx.dashboard.refresh(None).expect("refresh should succeed");
    assert_eq!(view.date, NaiveDate::from_ymd_opt(2025, 3, 3));
    assert_eq!(view.summary.count, 2);
    assert!(!view
        .available_dates
        .contains(&NaiveDate::from_ymd_opt(2025, 3, 5).expect("valid date")));
}

#[tokio::test]
async fn snapshot_search_and_sort_narrow_the_table() {
    let fx = fixture();

    let (status, json) = send_json(&fx.app, "GET", "/dashboard/snapshot?search=ALPHA").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(abbrs(&json["records"]), vec!["ALPHA"]);
    assert_eq!(json["shown"], 1);
    assert_eq!(json["total"], 2);
    assert_eq!(json["summary"]["count"], 2);

    let (_, json) = send_json(&fx.app, "GET", "/dashboard/snapshot?sort=nav").await;
    assert_eq!(abbrs(&json["records"]), vec!["BETA", "ALPHA"]);

    let (_, json) = send_json(&fx.app, "GET", "/dashboard/snapshot?search=fund&sort=name").await;
    assert_eq!(abbrs(&json["records"]), vec!["ALPHA", "BETA"]);

    let (status, _) = send(&fx.app, "GET", "/dashboard/snapshot?sort=size").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, page) = send(&fx.app, "GET", "/dashboard?search=beta").await;
    assert!(page.contains("Showing 1 of 2 funds"));
}

#[tokio::test]
async fn watchlist_requests_keep_a_pinned_date() {
    let fx = fixture();
    let (_, pinned) = send_json(&fx.app, "GET", "/dashboard/snapshot?date=2025-03-02").await;

    let (status, json) = send_json(&fx.app, "POST", "/watchlist/ALPHA").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["date"], "2025-03-02");
    assert_eq!(json["records"][0]["nav"], 1.1);

    send_json(&fx.app, "GET", "/watchlist").await;
    send_json(&fx.app, "DELETE", "/watchlist").await;

    let current = fx.dashboard.current().expect("published view");
    assert_eq!(current.requested_date, NaiveDate::from_ymd_opt(2025, 3, 2));
    assert_eq!(
        Some(current.generation),
        pinned["generation"].as_u64()
    );
}

#[tokio::test]
async fn refresh_picks_up_new_rows() {
    let fx = fixture();
    let (_, first) = send_json(&fx.app, "GET", "/dashboard/snapshot").await;
    assert_eq!(first["date"], "2025-03-03");

    let conn = Connection::open(&fx.db_path).expect("writer should open");
    conn.execute(
        "INSERT INTO nav_prices (fund_name, fund_abbr, nav, chg_pct, date) VALUES ('alpha fund', 'ALPHA', 1.2, '+20.00%', '2025-03-04')",
        [],
    )
    .expect("new row should insert");

    let (_, cached) = send_json(&fx.app, "GET", "/dashboard/snapshot").await;
    assert_eq!(cached["generation"], first["generation"]);

    let (status, refreshed) = send_json(&fx.app, "POST", "/dashboard/refresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["date"], "2025-03-04");
    assert_eq!(abbrs(&refreshed["records"]), vec!["ALPHA"]);
    assert!(refreshed["generation"].as_u64() > first["generation"].as_u64());

    let current = fx.dashboard.current().expect("published view");
    assert_eq!(current.date, NaiveDate::from_ymd_opt(2025, 3, 4));
}

#[tokio::test]
async fn chart_pivots_requested_funds_in_request_order() {
    let fx = fixture();
    let (status, json) = send_json(&fx.app, "GET", "/dashboard/chart?funds=BETA,ALPHA").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["fund_keys"], serde_json::json!(["BETA", "ALPHA"]));
    assert_eq!(json["unique_date_count"], 2);
    assert_eq!(json["rows"][0]["date"], "2025-03-02");
    assert_eq!(json["rows"][0]["ALPHA"], 1.1);
    assert_eq!(json["rows"][1]["BETA"], 2.0);

    let (_, capped) = send_json(&fx.app, "GET", "/dashboard/chart?funds=BETA,ALPHA&max_series=1").await;
    assert_eq!(capped["fund_keys"], serde_json::json!(["BETA"]));
    assert_eq!(capped["rows"][0].get("ALPHA"), None);
}

#[tokio::test]
async fn fund_history_reports_stats() {
    let fx = fixture();
    let (status, json) = send_json(&fx.app, "GET", "/funds/ALPHA/history").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["points"].as_array().expect("points").len(), 2);
    assert_eq!(json["stats"]["data_points"], 2);
    assert_eq!(json["stats"]["first_date"], "2025-03-02");
    assert_eq!(json["stats"]["max_nav"], 1.1);
    let pct = json["stats"]["overall_change_pct"].as_f64().expect("pct");
    assert!((pct - (-9.090909)).abs() < 1e-4);

    let (status, missing) = send_json(&fx.app, "GET", "/funds/NOPE/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(missing["stats"], Value::Null);
}

#[tokio::test]
async fn watchlist_toggle_filter_and_clear_persist() {
    let fx = fixture();

    let (status, json) = send_json(&fx.app, "POST", "/watchlist/BETA").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["entries"], serde_json::json!(["BETA"]));
    assert_eq!(abbrs(&json["records"]), vec!["BETA"]);
    assert_eq!(
        fx.kv.get(WATCHLIST_KEY).expect("kv read").as_deref(),
        Some(r#"["BETA"]"#)
    );

    let (_, page) = send(&fx.app, "GET", "/dashboard").await;
    assert!(page.contains("<tr class=\"watched\"><td>Beta Fund</td>"));

    let (_, json) = send_json(&fx.app, "POST", "/watchlist/BETA").await;
    assert_eq!(json["entries"], serde_json::json!([]));

    send_json(&fx.app, "POST", "/watchlist/ALPHA").await;
    let (status, json) = send_json(&fx.app, "DELETE", "/watchlist").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["entries"], serde_json::json!([]));
    assert_eq!(
        fx.kv.get(WATCHLIST_KEY).expect("kv read").as_deref(),
        Some("[]")
    );
}

#[tokio::test]
async fn dashboard_page_renders_cards_and_table() {
    let fx = fixture();
    let (status, page) = send(&fx.app, "GET", "/dashboard").await;

    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("<table id=\"nav-table\">"));
    assert!(page.contains("Total Funds (Mar 3, 2025)"));
    assert!(page.contains("2 of 3"));
    assert!(page.contains("card low"));
    assert!(page.contains("<td class=\"down\">-9.09%</td>"));
    assert!(page.contains("Last updated: 2025-03-03 08:00 UTC"));
}

#[tokio::test]
async fn scrape_trigger_is_not_implemented() {
    let fx = fixture();
    let (status, json) = send_json(&fx.app, "POST", "/api/scrape").await;

    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(json["success"], false);
    assert_eq!(json["options"].as_array().expect("options").len(), 3);
}

struct OfflineStore;

fn offline() -> StoreError {
    StoreError::Io(std::io::Error::other("store offline"))
}

impl NavStore for OfflineStore {
    fn prices_for_date(&self, _date: NaiveDate) -> Result<Vec<RawNavRow>, StoreError> {
        Err(offline())
    }
    fn latest_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        Err(offline())
    }
    fn available_dates(&self, _limit: usize) -> Result<Vec<NaiveDate>, StoreError> {
        Err(offline())
    }
    fn fund_history(&self, _fund_abbr: &str) -> Result<Vec<FundHistoryPoint>, StoreError> {
        Err(offline())
    }
    fn price_observations(
        &self,
        _fund_abbrs: &[String],
        _limit: usize,
    ) -> Result<Vec<RawNavRow>, StoreError> {
        Err(offline())
    }
    fn recent_changes(&self, _limit: usize) -> Result<Vec<RawChangeRow>, StoreError> {
        Err(offline())
    }
    fn latest_scrape_run(&self) -> Result<Option<ScrapeRun>, StoreError> {
        Err(offline())
    }
    fn distinct_fund_count(&self) -> Result<i64, StoreError> {
        Err(offline())
    }
    fn change_token(&self) -> Result<i64, StoreError> {
        Err(offline())
    }
}

#[tokio::test]
async fn store_failure_maps_to_service_unavailable() {
    let dashboard = Arc::new(Dashboard::new(
        Arc::new(OfflineStore),
        DashboardConfig::default(),
    ));
    let watchlist = Arc::new(Mutex::new(Watchlist::load(Arc::new(
        MemoryKeyValueStore::new(),
    ))));
    let app = dashboard_router(Arc::clone(&dashboard), watchlist);

    let (status, json) = send_json(&app, "GET", "/dashboard/snapshot").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["error"]
        .as_str()
        .expect("error message")
        .contains("store offline"));

    let (status, _) = send_json(&app, "GET", "/funds/ALPHA/history").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(dashboard.current().is_none());
}

#[tokio::test]
async fn external_write_triggers_auto_refresh() {
    let fx = fixture();
    fx.dashboard.refresh(None).expect("initial refresh");

    let notifier = Arc::new(ChangeNotifier::new());
    let store: Arc<dyn NavStore> =
        Arc::new(SqliteNavStore::open(&fx.db_path).expect("watch store should open"));
    let auto = spawn_auto_refresh(Arc::clone(&fx.dashboard), &notifier);
    let watcher = spawn_change_watcher(store, Arc::clone(&notifier), Duration::from_millis(10));

    // Let the watcher record its baseline token before writing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let conn = Connection::open(&fx.db_path).expect("writer should open");
    conn.execute(
        "INSERT INTO nav_prices (fund_name, fund_abbr, nav, date) VALUES ('Beta Fund', 'BETA', 2.1, '2025-03-05')",
        [],
    )
    .expect("new row should insert");

    let expected = NaiveDate::from_ymd_opt(2025, 3, 5);
    let refreshed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if fx.dashboard.current().and_then(|view| view.date) == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    watcher.abort();
    auto.abort();
    assert!(refreshed.is_ok(), "dashboard should follow the external write");
}

struct ThreadRecordingStore {
    inner: SqliteNavStore,
    threads: Mutex<Vec<std::thread::ThreadId>>,
}

impl ThreadRecordingStore {
    fn record(&self) {
        self.threads
            .lock()
            .expect("thread log lock should not be poisoned")
            .push(std::thread::current().id());
    }
}

impl NavStore for ThreadRecordingStore {
    fn prices_for_date(&self, date: NaiveDate) -> Result<Vec<RawNavRow>, StoreError> {
        self.record();
        self.inner.prices_for_date(date)
    }
    fn latest_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        self.record();
        self.inner.latest_date()
    }
    fn available_dates(&self, limit: usize) -> Result<Vec<NaiveDate>, StoreError> {
        self.record();
        self.inner.available_dates(limit)
    }
    fn fund_history(&self, fund_abbr: &str) -> Result<Vec<FundHistoryPoint>, StoreError> {
        self.record();
        self.inner.fund_history(fund_abbr)
    }
    fn price_observations(
        &self,
        fund_abbrs: &[String],
        limit: usize,
    ) -> Result<Vec<RawNavRow>, StoreError> {
        self.record();
        self.inner.price_observations(fund_abbrs, limit)
    }
    fn recent_changes(&self, limit: usize) -> Result<Vec<RawChangeRow>, StoreError> {
        self.record();
        self.inner.recent_changes(limit)
    }
    fn latest_scrape_run(&self) -> Result<Option<ScrapeRun>, StoreError> {
        self.record();
        self.inner.latest_scrape_run()
    }
    fn distinct_fund_count(&self) -> Result<i64, StoreError> {
        self.record();
        self.inner.distinct_fund_count()
    }
    fn change_token(&self) -> Result<i64, StoreError> {
        self.record();
        self.inner.change_token()
    }
}

#[tokio::test]
async fn store_queries_run_off_the_request_thread() {
    let fx = fixture();
    let store = Arc::new(ThreadRecordingStore {
        inner: SqliteNavStore::open(&fx.db_path).expect("store should reopen"),
        threads: Mutex::new(Vec::new()),
    });
    let dashboard = Arc::new(Dashboard::new(store.clone(), DashboardConfig::default()));
    let watchlist = Arc::new(Mutex::new(Watchlist::load(Arc::new(
        MemoryKeyValueStore::new(),
    ))));
    let app = dashboard_router(dashboard, watchlist);

    for uri in [
        "/dashboard/snapshot",
        "/dashboard/chart?funds=ALPHA",
        "/funds/ALPHA/history",
    ] {
        let (status, _) = send(&app, "GET", uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
    }

    let request_thread = std::thread::current().id();
    let threads = store
        .threads
        .lock()
        .expect("thread log lock should not be poisoned");
    assert!(!threads.is_empty());
    assert!(threads.iter().all(|id| *id != request_thread));
}
