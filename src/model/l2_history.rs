//! Bounded per-book L2 history: an ordered snapshot series plus a trade tape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::price_level::Trade;
use super::snapshot::L2Snapshot;

/// Ordered `timestamp -> L2Snapshot` and `timestamp -> Trade` series for one
/// `(validator, book)` pair, bounded to `retention_ns` once populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct L2History {
    pub snapshots: BTreeMap<i64, L2Snapshot>,
    pub trades: BTreeMap<i64, Trade>,
    pub retention_ns: i64,
}

impl L2History {
    pub fn new(retention_ns: i64) -> Self {
        Self {
            snapshots: BTreeMap::new(),
            trades: BTreeMap::new(),
            retention_ns,
        }
    }

    pub fn start(&self) -> Option<i64> {
        self.snapshots.keys().next().copied()
    }

    pub fn end(&self) -> Option<i64> {
        self.snapshots.keys().next_back().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Merge newly replayed snapshots/trades in by timestamp, then truncate to
    /// the retention window from the tail.
    pub fn append(
        &mut self,
        new_snapshots: BTreeMap<i64, L2Snapshot>,
        new_trades: BTreeMap<i64, Trade>,
    ) {
        self.snapshots.extend(new_snapshots);
        self.trades.extend(new_trades);
        self.truncate();
    }

    fn truncate(&mut self) {
        if let Some(&end) = self.snapshots.keys().next_back() {
            let floor = end - self.retention_ns;
            self.snapshots.retain(|&ts, _| ts >= floor);
            self.trades.retain(|&ts, _| ts >= floor);
        }
    }

    /// `end - start`, or 0 when empty — checked against `retention_ns` by callers.
    pub fn span(&self) -> i64 {
        match (self.start(), self.end()) {
            (Some(s), Some(e)) => e - s,
            _ => 0,
        }
    }

    pub fn last_snapshot(&self) -> Option<&L2Snapshot> {
        self.snapshots.values().next_back()
    }

    /// Mid-quote series (best_bid + best_ask)/2 across the history, skipping
    /// any timestamp where one side is empty.
    pub fn midquotes(&self) -> Vec<(i64, f64)> {
        self.snapshots
            .iter()
            .filter_map(|(&ts, snap)| match (snap.best_bid(), snap.best_ask()) {
                (Some(b), Some(a)) => Some((ts, (b + a) / 2.0)),
                _ => None,
            })
            .collect()
    }

    pub fn mean_imbalance(&self, depth: Option<usize>) -> f64 {
        if self.snapshots.is_empty() {
            return 0.0;
        }
        let total: f64 = self.snapshots.values().map(|s| s.imbalance(depth)).sum();
        total / self.snapshots.len() as f64
    }
}
