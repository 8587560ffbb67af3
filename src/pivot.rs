//! Reshapes (date, fund, nav) observations into one row per date for multi-series charts.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::records::NavRecord;

/// Display cap on the number of series in one chart.
pub const DEFAULT_MAX_SERIES: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub fund_abbr: String,
    pub nav: f64,
}

/// One chart row. Serializes flat, e.g. `{"date":"2025-03-01","ABC":1.25}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRow {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PivotResult {
    pub rows: Vec<ChartRow>,
    pub fund_keys: Vec<String>,
    pub unique_date_count: usize,
}

impl PivotResult {
    /// Fewer than two dates cannot show a trend, even when rows exist.
    pub fn has_trend(&self) -> bool {
        self.unique_date_count >= 2
    }
}

pub fn pivot(observations: &[Observation], max_series: usize) -> PivotResult {
    let mut fund_keys: Vec<String> = Vec::new();
    let mut seen_funds: HashSet<&str> = HashSet::new();
    for obs in observations {
        if seen_funds.insert(obs.fund_abbr.as_str()) && fund_keys.len() < max_series {
            fund_keys.push(obs.fund_abbr.clone());
        }
    }
    let kept: HashSet<&str> = fund_keys.iter().map(String::as_str).collect();

    let mut by_date: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
    for obs in observations {
        let row = by_date.entry(obs.date).or_default();
        if kept.contains(obs.fund_abbr.as_str()) {
            row.insert(obs.fund_abbr.clone(), obs.nav);
        }
    }

    let unique_date_count = by_date.len();
    let rows = by_date
        .into_iter()
        .map(|(date, values)| ChartRow { date, values })
        .collect();

    PivotResult {
        rows,
        fund_keys,
        unique_date_count,
    }
}

pub fn observations_from_records(records: &[NavRecord]) -> Vec<Observation> {
    records
        .iter()
        .map(|record| Observation {
            date: record.date,
            fund_abbr: record.fund_abbr.clone(),
            nav: record.nav,
        })
        .collect()
}
