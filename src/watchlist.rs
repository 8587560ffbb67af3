//! Favorite-fund watchlist persisted as a JSON array under a single key.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{info, warn};

use crate::records::NavRecord;

pub const WATCHLIST_KEY: &str = "nav-dashboard-watchlist";

#[derive(Debug, Error)]
pub enum KeyValueError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, KeyValueError>;
    fn set(&self, key: &str, value: &str) -> Result<(), KeyValueError>;
}

#[derive(Default)]
pub struct MemoryKeyValueStore {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeyValueError> {
        Ok(self
            .inner
            .read()
            .expect("key-value lock should not be poisoned")
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KeyValueError> {
        self.inner
            .write()
            .expect("key-value lock should not be poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    pub fn open(path: &Path) -> Result<Self, KeyValueError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, KeyValueError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, KeyValueError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeyValueError> {
        let conn = self
            .conn
            .lock()
            .expect("key-value connection lock should not be poisoned");
        Ok(conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KeyValueError> {
        let conn = self
            .conn
            .lock()
            .expect("key-value connection lock should not be poisoned");
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum WatchlistError {
    #[error("failed to persist watchlist: {0}")]
    Persist(#[from] KeyValueError),
    #[error("failed to encode watchlist: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Insertion-ordered set of fund identifiers.
///
/// The only constructor is [`Watchlist::load`], so every write happens after the
/// saved list has been read and cannot clobber it.
pub struct Watchlist {
    store: Arc<dyn KeyValueStore>,
    key: String,
    entries: Vec<String>,
}

impl Watchlist {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        Self::load_with_key(store, WATCHLIST_KEY)
    }

    pub fn load_with_key(store: Arc<dyn KeyValueStore>, key: &str) -> Self {
        let entries = match store.get(key) {
            Ok(Some(saved)) => match serde_json::from_str::<Vec<String>>(&saved) {
                Ok(parsed) => dedupe(parsed),
                Err(err) => {
                    warn!(
                        component = "watchlist",
                        event = "watchlist.load.corrupt",
                        key,
                        error = %err
                    );
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(
                    component = "watchlist",
                    event = "watchlist.load.failed",
                    key,
                    error = %err
                );
                Vec::new()
            }
        };

        info!(
            component = "watchlist",
            event = "watchlist.load",
            key,
            entries = entries.len()
        );

        Self {
            store,
            key: key.to_string(),
            entries,
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn contains(&self, fund_abbr: &str) -> bool {
        self.entries.iter().any(|entry| entry == fund_abbr)
    }

    /// Adds the fund if absent, removes it otherwise. Returns whether it is now watched.
    pub fn toggle(&mut self, fund_abbr: &str) -> Result<bool, WatchlistError> {
        if self.contains(fund_abbr) {
            self.remove(fund_abbr)?;
            Ok(false)
        } else {
            self.add(fund_abbr)?;
            Ok(true)
        }
    }

    pub fn add(&mut self, fund_abbr: &str) -> Result<(), WatchlistError> {
        let fund_abbr = fund_abbr.trim();
        if fund_abbr.is_empty() || self.contains(fund_abbr) {
            return Ok(());
        }
        self.entries.push(fund_abbr.to_string());
        self.persist()
    }

    pub fn remove(&mut self, fund_abbr: &str) -> Result<(), WatchlistError> {
        let before = self.entries.len();
        self.entries.retain(|entry| entry != fund_abbr.trim());
        if self.entries.len() == before {
            return Ok(());
        }
        self.persist()
    }

    pub fn clear(&mut self) -> Result<(), WatchlistError> {
        self.entries.clear();
        self.persist()
    }

    /// Snapshot records for watched funds, in snapshot order.
    pub fn filter_records(&self, records: &[NavRecord]) -> Vec<NavRecord> {
        records
            .iter()
            .filter(|record| self.contains(&record.fund_abbr))
            .cloned()
            .collect()
    }

    fn persist(&self) -> Result<(), WatchlistError> {
        let encoded = serde_json::to_string(&self.entries)?;
        if let Err(err) = self.store.set(&self.key, &encoded) {
            warn!(
                component = "watchlist",
                event = "watchlist.persist.failed",
                key = %self.key,
                error = %err
            );
            return Err(err.into());
        }
        Ok(())
    }
}

fn dedupe(entries: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(entries.len());
    for entry in entries {
        let trimmed = entry.trim();
        if !trimmed.is_empty() && !out.iter().any(|existing| existing == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}
