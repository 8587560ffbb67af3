//! Canonical NAV record shapes and the normalizer that produces them from raw store rows.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// A `nav_prices` row as it comes out of the store, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawNavRow {
    pub fund_name: Option<String>,
    pub fund_abbr: Option<String>,
    pub nav: Option<f64>,
    pub chg: Option<String>,
    pub chg_pct: Option<String>,
    pub date: Option<String>,
}

/// A `nav_changes` row as it comes out of the store, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChangeRow {
    pub fund_name: Option<String>,
    pub fund_abbr: Option<String>,
    pub nav_old: Option<f64>,
    pub nav_new: Option<f64>,
    pub change: Option<f64>,
    pub change_pct: Option<f64>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavRecord {
    pub fund_name: String,
    pub fund_abbr: String,
    pub nav: f64,
    /// Pre-formatted absolute change. Display only.
    pub change_abs: Option<String>,
    /// Pre-formatted signed percentage. Display only; use [`NavRecord::direction`] for sign.
    pub change_pct: Option<String>,
    pub date: NaiveDate,
}

impl NavRecord {
    /// Direction of the day's change, derived from the numeric value behind `change_pct`.
    pub fn direction(&self) -> Option<ChangeDirection> {
        self.change_pct
            .as_deref()
            .and_then(parse_pct_text)
            .map(ChangeDirection::from_value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavChangeRecord {
    pub fund_abbr: String,
    pub fund_name: String,
    pub nav_old: f64,
    pub nav_new: f64,
    pub change_abs: f64,
    /// `None` when the previous NAV is zero or the ratio is not finite.
    pub change_pct: Option<f64>,
    pub date: NaiveDate,
}

impl NavChangeRecord {
    pub fn between(
        fund_abbr: impl Into<String>,
        fund_name: impl Into<String>,
        nav_old: f64,
        nav_new: f64,
        date: NaiveDate,
    ) -> Self {
        Self {
            fund_abbr: fund_abbr.into(),
            fund_name: fund_name.into(),
            nav_old,
            nav_new,
            change_abs: nav_new - nav_old,
            change_pct: percent_change(nav_old, nav_new),
            date,
        }
    }

    pub fn direction(&self) -> Option<ChangeDirection> {
        self.change_pct.map(ChangeDirection::from_value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundHistoryPoint {
    pub date: NaiveDate,
    pub nav: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub row_count: u64,
    pub error_message: Option<String>,
}

impl ScrapeRun {
    pub fn is_success(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("success")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Up,
    Down,
    Flat,
}

impl ChangeDirection {
    pub fn from_value(value: f64) -> Self {
        if value > 0.0 {
            Self::Up
        } else if value < 0.0 {
            Self::Down
        } else {
            Self::Flat
        }
    }
}

/// Output of a normalization pass: the surviving records plus how many rows were dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    pub excluded: usize,
}

impl<T> Default for Normalized<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            excluded: 0,
        }
    }
}

pub fn normalize(rows: Vec<RawNavRow>) -> Normalized<NavRecord> {
    let input_rows = rows.len();
    let mut seen: HashSet<(NaiveDate, String)> = HashSet::new();
    let mut out = Normalized::default();

    for row in rows {
        let Some(record) = nav_record_from_raw(row) else {
            out.excluded += 1;
            continue;
        };

        if !seen.insert((record.date, record.fund_abbr.clone())) {
            debug!(
                component = "records",
                event = "normalize.duplicate",
                fund_abbr = %record.fund_abbr,
                date = %record.date
            );
            out.excluded += 1;
            continue;
        }

        out.records.push(record);
    }

    log_exclusions("nav_prices", input_rows, out.excluded);
    out
}

pub fn normalize_changes(rows: Vec<RawChangeRow>) -> Normalized<NavChangeRecord> {
    let input_rows = rows.len();
    let mut out = Normalized::default();

    for row in rows {
        match change_record_from_raw(row) {
            Some(record) => out.records.push(record),
            None => out.excluded += 1,
        }
    }

    log_exclusions("nav_changes", input_rows, out.excluded);
    out
}

/// Records sharing the most recent date, ordered for display.
pub fn latest_snapshot(records: &[NavRecord]) -> Vec<NavRecord> {
    match records.iter().map(|record| record.date).max() {
        Some(latest) => snapshot_for_date(records, latest),
        None => Vec::new(),
    }
}

pub fn snapshot_for_date(records: &[NavRecord], date: NaiveDate) -> Vec<NavRecord> {
    let mut out: Vec<NavRecord> = records
        .iter()
        .filter(|record| record.date == date)
        .cloned()
        .collect();
    out.sort_by(display_order);
    out
}

/// Strict `YYYY-MM-DD`. Unpadded forms like `2025-3-5` are rejected so that a parsed
/// date always round-trips to the exact text stored upstream.
pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let well_formed = trimmed.len() == 10
        && trimmed.bytes().enumerate().all(|(idx, byte)| match idx {
            4 | 7 => byte == b'-',
            _ => byte.is_ascii_digit(),
        });
    if !well_formed {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, ISO_DATE_FORMAT).ok()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSort {
    /// Fund name, case-insensitive, then abbreviation.
    #[default]
    Name,
    /// Highest NAV first.
    Nav,
}

/// Case-insensitive search over fund name or abbreviation, then the chosen ordering.
/// A blank term keeps every record.
pub fn filter_records(records: &[NavRecord], term: &str, sort: TableSort) -> Vec<NavRecord> {
    let needle = term.trim().to_lowercase();
    let mut out: Vec<NavRecord> = records
        .iter()
        .filter(|record| {
            needle.is_empty()
                || record.fund_name.to_lowercase().contains(&needle)
                || record.fund_abbr.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect();

    match sort {
        TableSort::Name => out.sort_by(display_order),
        TableSort::Nav => {
            out.sort_by(|a, b| b.nav.total_cmp(&a.nav).then_with(|| display_order(a, b)))
        }
    }
    out
}

/// Numeric value of a pre-formatted percentage such as `"+1.25%"` or `"-0.40"`.
pub fn parse_pct_text(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_end_matches('%').trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    unsigned.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub(crate) fn percent_change(from: f64, to: f64) -> Option<f64> {
    if from == 0.0 {
        return None;
    }
    let pct = (to - from) / from * 100.0;
    pct.is_finite().then_some(pct)
}

fn nav_record_from_raw(row: RawNavRow) -> Option<NavRecord> {
    let fund_abbr = non_blank(row.fund_abbr)?;
    let nav = row.nav.filter(|nav| nav.is_finite())?;
    let date = row.date.as_deref().and_then(parse_iso_date)?;
    let fund_name = non_blank(row.fund_name).unwrap_or_else(|| fund_abbr.clone());

    Some(NavRecord {
        fund_name,
        fund_abbr,
        nav,
        change_abs: non_blank(row.chg),
        change_pct: non_blank(row.chg_pct),
        date,
    })
}

fn change_record_from_raw(row: RawChangeRow) -> Option<NavChangeRecord> {
    let fund_abbr = non_blank(row.fund_abbr)?;
    let nav_old = row.nav_old.filter(|nav| nav.is_finite())?;
    let nav_new = row.nav_new.filter(|nav| nav.is_finite())?;
    let date = row.date.as_deref().and_then(parse_iso_date)?;
    let fund_name = non_blank(row.fund_name).unwrap_or_else(|| fund_abbr.clone());

    let mut record = NavChangeRecord::between(fund_abbr, fund_name, nav_old, nav_new, date);
    if let Some(stored) = row.change.filter(|value| value.is_finite()) {
        record.change_abs = stored;
    }
    if let Some(stored) = row.change_pct.filter(|value| value.is_finite()) {
        record.change_pct = Some(stored);
    }
    Some(record)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

fn display_order(a: &NavRecord, b: &NavRecord) -> Ordering {
    a.fund_name
        .to_lowercase()
        .cmp(&b.fund_name.to_lowercase())
        .then_with(|| a.fund_abbr.cmp(&b.fund_abbr))
}

fn log_exclusions(table: &'static str, input_rows: usize, excluded: usize) {
    if excluded > 0 {
        info!(
            component = "records",
            event = "normalize.excluded",
            table,
            input_rows,
            excluded
        );
    }
}
