//! Snapshot summary: count, coverage against the expected fund universe, NAV range.

use serde::{Deserialize, Serialize};

use crate::records::NavRecord;

/// Size of the fund universe the dashboard was built around.
pub const DEFAULT_EXPECTED_FUNDS: i64 = 182;
pub const LOW_COVERAGE_THRESHOLD_PCT: f64 = 80.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub expected_count: i64,
    pub coverage_pct: f64,
    pub avg_nav: Option<f64>,
    pub min_nav: Option<f64>,
    pub max_nav: Option<f64>,
    pub low_coverage: bool,
}

pub fn summarize(records: &[NavRecord], expected_count: i64) -> Summary {
    let count = records.len();
    let coverage_pct = coverage_pct(count, expected_count);

    let (avg_nav, min_nav, max_nav) = if records.is_empty() {
        (None, None, None)
    } else {
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for record in records {
            sum += record.nav;
            min = min.min(record.nav);
            max = max.max(record.nav);
        }
        (Some(sum / count as f64), Some(min), Some(max))
    };

    Summary {
        count,
        expected_count,
        coverage_pct,
        avg_nav: avg_nav.filter(|v| v.is_finite()),
        min_nav: min_nav.filter(|v| v.is_finite()),
        max_nav: max_nav.filter(|v| v.is_finite()),
        low_coverage: coverage_pct < LOW_COVERAGE_THRESHOLD_PCT,
    }
}

fn coverage_pct(count: usize, expected_count: i64) -> f64 {
    if expected_count <= 0 {
        return 0.0;
    }
    count as f64 / expected_count as f64 * 100.0
}
