//! Per-fund statistics over the full price history.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::records::{percent_change, FundHistoryPoint};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub min_nav: f64,
    pub max_nav: f64,
    pub avg_nav: f64,
    /// `None` when the first observation is zero.
    pub overall_change_pct: Option<f64>,
    pub data_points: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

pub fn stats(history: &[FundHistoryPoint]) -> Option<HistoryStats> {
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|point| point.date);

    let first = *sorted.first()?;
    let last = *sorted.last()?;

    let mut sum = 0.0;
    let mut min_nav = f64::INFINITY;
    let mut max_nav = f64::NEG_INFINITY;
    for point in &sorted {
        sum += point.nav;
        min_nav = min_nav.min(point.nav);
        max_nav = max_nav.max(point.nav);
    }

    Some(HistoryStats {
        min_nav,
        max_nav,
        avg_nav: sum / sorted.len() as f64,
        overall_change_pct: percent_change(first.nav, last.nav),
        data_points: sorted.len(),
        first_date: first.date,
        last_date: last.date,
    })
}
