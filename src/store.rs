//! Read side of the upstream NAV tables (`nav_prices`, `nav_changes`, `scrape_runs`).

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{info, warn};

use crate::records::{parse_iso_date, FundHistoryPoint, RawChangeRow, RawNavRow, ScrapeRun};

pub const DEFAULT_CHANGES_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Queries the dashboard needs from the upstream store. Rows come back raw and are
/// validated by the normalizer, so one bad row never fails a query.
pub trait NavStore: Send + Sync + 'static {
    fn prices_for_date(&self, date: NaiveDate) -> Result<Vec<RawNavRow>, StoreError>;
    fn latest_date(&self) -> Result<Option<NaiveDate>, StoreError>;
    fn available_dates(&self, limit: usize) -> Result<Vec<NaiveDate>, StoreError>;
    fn fund_history(&self, fund_abbr: &str) -> Result<Vec<FundHistoryPoint>, StoreError>;
    fn price_observations(
        &self,
        fund_abbrs: &[String],
        limit: usize,
    ) -> Result<Vec<RawNavRow>, StoreError>;
    fn recent_changes(&self, limit: usize) -> Result<Vec<RawChangeRow>, StoreError>;
    fn latest_scrape_run(&self) -> Result<Option<ScrapeRun>, StoreError>;
    fn distinct_fund_count(&self) -> Result<i64, StoreError>;
    /// Opaque value that changes whenever another writer commits to the store.
    fn change_token(&self) -> Result<i64, StoreError>;
}

pub struct SqliteNavStore {
    conn: Mutex<Connection>,
}

impl SqliteNavStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            ",
        )?;
        ensure_schema(&conn)?;

        info!(
            component = "store",
            event = "store.open",
            path = %path.display()
        );
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn with_conn<R>(
        &self,
        f: impl FnOnce(&Connection) -> Result<R, rusqlite::Error>,
    ) -> Result<R, StoreError> {
        let guard = self
            .conn
            .lock()
            .expect("sqlite connection lock should not be poisoned");
        Ok(f(&guard)?)
    }
}

pub fn ensure_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS nav_prices (
            id INTEGER PRIMARY KEY,
            fund_name TEXT,
            fund_abbr TEXT,
            nav REAL,
            chg TEXT,
            chg_pct TEXT,
            date TEXT,
            created_at TEXT
        );
        CREATE INDEX IF NOT EXISTS nav_prices_date_idx ON nav_prices(date);
        CREATE INDEX IF NOT EXISTS nav_prices_fund_idx ON nav_prices(fund_abbr, date);

        CREATE TABLE IF NOT EXISTS nav_changes (
            id INTEGER PRIMARY KEY,
            fund_name TEXT,
            fund_abbr TEXT,
            nav_old REAL,
            nav_new REAL,
            change REAL,
            change_pct REAL,
            date TEXT
        );
        CREATE INDEX IF NOT EXISTS nav_changes_date_idx ON nav_changes(date);

        CREATE TABLE IF NOT EXISTS scrape_runs (
            id INTEGER PRIMARY KEY,
            timestamp TEXT NOT NULL,
            status TEXT NOT NULL,
            row_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT
        );
        ",
    )
}

const NAV_ROW_COLUMNS: &str = "fund_name, fund_abbr, nav, chg, chg_pct, date";

impl NavStore for SqliteNavStore {
    fn prices_for_date(&self, date: NaiveDate) -> Result<Vec<RawNavRow>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {NAV_ROW_COLUMNS} FROM nav_prices WHERE date = ?1 ORDER BY fund_name, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![date.to_string()], raw_nav_row)?;
            rows.collect()
        })
    }

    fn latest_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.available_dates(1)?.into_iter().next())
    }

    fn available_dates(&self, limit: usize) -> Result<Vec<NaiveDate>, StoreError> {
        let raw: Vec<Value> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "
                SELECT DISTINCT date FROM nav_prices
                WHERE date GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]'
                ORDER BY date DESC
                LIMIT ?1
                ",
            )?;
            let rows = stmt.query_map(params![sql_limit(limit)], |row| row.get::<_, Value>(0))?;
            rows.collect()
        })?;

        Ok(raw
            .into_iter()
            .filter_map(|date| value_as_text(date).as_deref().and_then(parse_iso_date))
            .collect())
    }

    fn fund_history(&self, fund_abbr: &str) -> Result<Vec<FundHistoryPoint>, StoreError> {
        let raw: Vec<(Value, Value)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date, nav FROM nav_prices WHERE fund_abbr = ?1 ORDER BY date ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![fund_abbr.trim()], |row| {
                Ok((row.get::<_, Value>(0)?, row.get::<_, Value>(1)?))
            })?;
            rows.collect()
        })?;

        let mut skipped = 0usize;
        let points: Vec<FundHistoryPoint> = raw
            .into_iter()
            .filter_map(|(date, nav)| {
                let point = value_as_text(date)
                    .as_deref()
                    .and_then(parse_iso_date)
                    .zip(value_as_f64(nav).filter(|nav| nav.is_finite()))
                    .map(|(date, nav)| FundHistoryPoint { date, nav });
                if point.is_none() {
                    skipped += 1;
                }
                point
            })
            .collect();

        if skipped > 0 {
            warn!(
                component = "store",
                event = "store.history.rows_skipped",
                fund_abbr,
                skipped
            );
        }
        Ok(points)
    }

    fn price_observations(
        &self,
        fund_abbrs: &[String],
        limit: usize,
    ) -> Result<Vec<RawNavRow>, StoreError> {
        self.with_conn(|conn| {
            let mut bound: Vec<Value> = fund_abbrs
                .iter()
                .map(|abbr| Value::Text(abbr.trim().to_string()))
                .collect();
            let filter = if bound.is_empty() {
                String::new()
            } else {
                let placeholders = vec!["?"; bound.len()].join(", ");
                format!("WHERE fund_abbr IN ({placeholders})")
            };
            bound.push(Value::Integer(sql_limit(limit)));

            let sql = format!(
                "SELECT {NAV_ROW_COLUMNS} FROM nav_prices {filter} ORDER BY date DESC, id DESC LIMIT ?"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bound), raw_nav_row)?;
            rows.collect()
        })
    }

    fn recent_changes(&self, limit: usize) -> Result<Vec<RawChangeRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "
                SELECT fund_name, fund_abbr, nav_old, nav_new, change, change_pct, date
                FROM nav_changes
                ORDER BY date DESC, id DESC
                LIMIT ?1
                ",
            )?;
            let rows = stmt.query_map(params![sql_limit(limit)], |row| {
                Ok(RawChangeRow {
                    fund_name: value_as_text(row.get(0)?),
                    fund_abbr: value_as_text(row.get(1)?),
                    nav_old: value_as_f64(row.get(2)?),
                    nav_new: value_as_f64(row.get(3)?),
                    change: value_as_f64(row.get(4)?),
                    change_pct: value_as_f64(row.get(5)?),
                    date: value_as_text(row.get(6)?),
                })
            })?;
            rows.collect()
        })
    }

    fn latest_scrape_run(&self) -> Result<Option<ScrapeRun>, StoreError> {
        let raw = self.with_conn(|conn| {
            conn.query_row(
                "
                SELECT timestamp, status, row_count, error_message
                FROM scrape_runs
                ORDER BY timestamp DESC, id DESC
                LIMIT 1
                ",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()
        })?;

        let Some((timestamp, status, row_count, error_message)) = raw else {
            return Ok(None);
        };

        match parse_timestamp(&timestamp) {
            Some(timestamp) => Ok(Some(ScrapeRun {
                timestamp,
                status,
                row_count: u64::try_from(row_count).unwrap_or(0),
                error_message,
            })),
            None => {
                warn!(
                    component = "store",
                    event = "store.scrape_run.bad_timestamp",
                    timestamp = %timestamp
                );
                Ok(None)
            }
        }
    }

    fn distinct_fund_count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(DISTINCT TRIM(fund_abbr)) FROM nav_prices WHERE TRIM(COALESCE(fund_abbr, '')) <> ''",
                [],
                |row| row.get(0),
            )
        })
    }

    fn change_token(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| conn.query_row("PRAGMA data_version", [], |row| row.get(0)))
    }
}

fn raw_nav_row(row: &rusqlite::Row<'_>) -> Result<RawNavRow, rusqlite::Error> {
    Ok(RawNavRow {
        fund_name: value_as_text(row.get(0)?),
        fund_abbr: value_as_text(row.get(1)?),
        nav: value_as_f64(row.get(2)?),
        chg: value_as_text(row.get(3)?),
        chg_pct: value_as_text(row.get(4)?),
        date: value_as_text(row.get(5)?),
    })
}

fn value_as_text(value: Value) -> Option<String> {
    match value {
        Value::Text(text) => Some(text),
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        Value::Null | Value::Blob(_) => None,
    }
}

fn value_as_f64(value: Value) -> Option<f64> {
    match value {
        Value::Real(v) => Some(v),
        Value::Integer(v) => Some(v as f64),
        Value::Text(text) => text.trim().parse().ok(),
        Value::Null | Value::Blob(_) => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.and_utc())
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
