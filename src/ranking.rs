//! Gainer/loser ranking and the absolute-movers feed over change records.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::records::NavChangeRecord;

pub const DEFAULT_RANK_SIZE: usize = 5;
pub const TOP_MOVERS_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RankedChanges {
    pub gainers: Vec<NavChangeRecord>,
    pub losers: Vec<NavChangeRecord>,
}

pub fn rank(changes: &[NavChangeRecord], n: usize) -> RankedChanges {
    // `sort_by` is stable, so equal percentages keep their input order.
    let mut gainers: Vec<NavChangeRecord> = changes
        .iter()
        .filter(|c| c.change_pct.is_some_and(|pct| pct > 0.0))
        .cloned()
        .collect();
    gainers.sort_by(|a, b| cmp_pct(b.change_pct, a.change_pct));
    gainers.truncate(n);

    let mut losers: Vec<NavChangeRecord> = changes
        .iter()
        .filter(|c| c.change_pct.is_some_and(|pct| pct < 0.0))
        .cloned()
        .collect();
    losers.sort_by(|a, b| cmp_pct(a.change_pct, b.change_pct));
    losers.truncate(n);

    RankedChanges { gainers, losers }
}

/// Largest absolute moves first; records without a computable percentage go last.
pub fn top_movers(changes: &[NavChangeRecord], limit: usize) -> Vec<NavChangeRecord> {
    let mut out = changes.to_vec();
    out.sort_by(|a, b| match (a.change_pct, b.change_pct) {
        (Some(x), Some(y)) => y.abs().total_cmp(&x.abs()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    out.truncate(limit);
    out
}

fn cmp_pct(a: Option<f64>, b: Option<f64>) -> Ordering {
    a.unwrap_or(0.0).total_cmp(&b.unwrap_or(0.0))
}
