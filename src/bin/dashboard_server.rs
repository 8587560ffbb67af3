use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use navdash::{
    dashboard_config_from_env, dashboard_router, init_logging, log_app_bind, log_app_start,
    log_store_opened, logging_config_from_env, spawn_auto_refresh, spawn_change_watcher,
    ChangeNotifier, Dashboard, KeyValueStore, NavStore, SqliteKeyValueStore, SqliteNavStore,
    Watchlist,
};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let addr: SocketAddr = env_or("NAVDASH_ADDR", "127.0.0.1:8080").parse()?;
    let db_path = PathBuf::from(env_or("NAVDASH_DB_PATH", "data/nav.sqlite"));
    let watchlist_path = PathBuf::from(env_or("NAVDASH_WATCHLIST_DB", "data/watchlist.sqlite"));
    let poll_interval = Duration::from_millis(env_or("NAVDASH_POLL_MS", "2000").parse()?);

    let store: Arc<dyn NavStore> = Arc::new(SqliteNavStore::open(&db_path)?);
    log_store_opened(&db_path, store.distinct_fund_count()?, store.latest_date()?);

    let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteKeyValueStore::open(&watchlist_path)?);
    let watchlist = Arc::new(Mutex::new(Watchlist::load(kv)));

    let dashboard = Arc::new(Dashboard::new(
        Arc::clone(&store),
        dashboard_config_from_env(),
    ));
    if let Err(err) = dashboard.refresh(None) {
        warn!(
            component = "dashboard_server",
            event = "app.initial_refresh.failed",
            error = %err
        );
    }

    let notifier = Arc::new(ChangeNotifier::new());
    let _auto_refresh = spawn_auto_refresh(Arc::clone(&dashboard), &notifier);
    let _watcher = spawn_change_watcher(store, Arc::clone(&notifier), poll_interval);

    let app = dashboard_router(dashboard, watchlist);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| default.to_string())
}
