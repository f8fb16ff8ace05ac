//! C2: HistoryManager — owns the bounded L2History per `(validator, book)`,
//! reconciles replayed history against simulator-published snapshots, and
//! enforces the retention/gap policy.
//!
//! Grounded on `taos.im.protocol.models.L2History.append/.reconcile` and
//! `L2Snapshot.compare/.reconcile` for the exact existing-volume lift
//! algorithm, and on `backtest_v2::l2_replay::L2ContractVerifier`'s idiom of
//! per-book state tracked in a flat map with a single serializing guard
//! (`parking_lot`, preferred here over `tokio::sync::RwLock` for short
//! critical sections).

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::model::{L2History, L2Snapshot, Trade};

/// Recovery state of a single book's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookStatus {
    Healthy,
    Recovering,
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub retention_ns: i64,
    pub depth: usize,
    pub volume_decimals: u8,
}

struct BookHistory {
    history: L2History,
    status: BookStatus,
}

/// Owns every `(validator_id, book_id)` history. `updating` serializes
/// append/reconcile so two steps never mutate the same manager concurrently
/// (§4.2): `update` is a non-blocking entry that rejects outright if a prior
/// update is still in flight, rather than queuing behind it.
pub struct HistoryManager {
    config: HistoryConfig,
    books: Mutex<HashMap<(u32, u32), BookHistory>>,
    updating: Mutex<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub discrepancies: Vec<String>,
    pub lifted: bool,
}

#[derive(Debug)]
pub enum UpdateError {
    AlreadyUpdating,
}

impl HistoryManager {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            books: Mutex::new(HashMap::new()),
            updating: Mutex::new(false),
        }
    }

    /// Non-blocking update entry (§4.2): returns `Err(AlreadyUpdating)`
    /// immediately if a prior update has not cleared its guard, letting the
    /// caller retry on the next step rather than blocking.
    pub fn begin_update(&self) -> Result<UpdateGuard<'_>, UpdateError> {
        let mut guard = self.updating.lock();
        if *guard {
            return Err(UpdateError::AlreadyUpdating);
        }
        *guard = true;
        drop(guard);
        Ok(UpdateGuard { manager: self })
    }

    fn clear_updating(&self) {
        *self.updating.lock() = false;
    }

    /// Merge replayed snapshots/trades into the book's bounded history.
    pub fn append(
        &self,
        validator_id: u32,
        book_id: u32,
        replayed_snapshots: BTreeMap<i64, L2Snapshot>,
        replayed_trades: BTreeMap<i64, Trade>,
    ) {
        let mut books = self.books.lock();
        let entry = books
            .entry((validator_id, book_id))
            .or_insert_with(|| BookHistory {
                history: L2History::new(self.config.retention_ns),
                status: BookStatus::Healthy,
            });
        entry.history.append(replayed_snapshots, replayed_trades);
    }

    pub fn read(&self, validator_id: u32, book_id: u32) -> Option<L2History> {
        self.books
            .lock()
            .get(&(validator_id, book_id))
            .map(|b| b.history.clone())
    }

    pub fn status(&self, validator_id: u32, book_id: u32) -> Option<BookStatus> {
        self.books
            .lock()
            .get(&(validator_id, book_id))
            .map(|b| b.status)
    }

    /// Reconcile the book's latest replayed snapshot against `target`, the
    /// snapshot the simulator published for the next step boundary. See
    /// §4.2: compute per-price discrepancies, lift the whole history by the
    /// same per-price correction, and re-truncate to depth.
    pub fn reconcile(
        &self,
        validator_id: u32,
        book_id: u32,
        target: &L2Snapshot,
        now: i64,
    ) -> ReconcileReport {
        let mut books = self.books.lock();
        let Some(entry) = books.get_mut(&(validator_id, book_id)) else {
            return ReconcileReport::default();
        };

        let Some(reconstructed) = entry.history.last_snapshot().cloned() else {
            return ReconcileReport::default();
        };

        let (matches, discrepancies, existing) =
            reconstructed.compare(target, self.config.volume_decimals);

        let lifted = !existing.is_empty();
        if lifted {
            for snap in entry.history.snapshots.values_mut() {
                snap.reconcile(
                    &existing,
                    self.config.volume_decimals,
                    Some(self.config.depth),
                );
            }
        }

        if !matches && !lifted {
            warn!(
                validator_id,
                book_id,
                count = discrepancies.len(),
                "unresolved reconciliation discrepancies"
            );
        }

        self.apply_gap_policy(entry, now);

        ReconcileReport {
            discrepancies,
            lifted,
        }
    }

    fn apply_gap_policy(&self, entry: &mut BookHistory, now: i64) {
        let Some(end) = entry.history.end() else {
            return;
        };
        let small_gap_floor = end + self.config.retention_ns / 10;
        if small_gap_floor > now {
            entry.status = BookStatus::Recovering;
        } else {
            debug!("large history gap detected, dropping book history");
            entry.history = L2History::new(self.config.retention_ns);
            entry.status = BookStatus::Healthy;
        }
    }
}

pub struct UpdateGuard<'a> {
    manager: &'a HistoryManager,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.manager.clear_updating();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PriceLevel;

    fn snap_with_ask(ts: i64, price: f64, qty: f64) -> L2Snapshot {
        let mut s = L2Snapshot::empty(ts);
        s.asks.insert(
            ordered_float::OrderedFloat(price),
            PriceLevel::new(price, qty),
        );
        s
    }

    #[test]
    fn retention_bound_holds_after_append() {
        let manager = HistoryManager::new(HistoryConfig {
            retention_ns: 100,
            depth: 5,
            volume_decimals: 8,
        });
        let mut snaps = BTreeMap::new();
        for ts in [0, 50, 120, 200] {
            snaps.insert(ts, snap_with_ask(ts, 101.0, 1.0));
        }
        manager.append(1, 0, snaps, BTreeMap::new());
        let history = manager.read(1, 0).unwrap();
        assert!(history.span() <= 100);
    }

    /// Scenario 2 (§8): reconstructed top ask 1.0@101, target 3.0@101.
    /// existing_volume[ASK][101] = 2.0 lifted across the history; final
    /// snapshot matches target with no residual discrepancy.
    #[test]
    fn reconciliation_lift_matches_scenario() {
        let manager = HistoryManager::new(HistoryConfig {
            retention_ns: 1_000_000,
            depth: 10,
            volume_decimals: 8,
        });
        let mut snaps = BTreeMap::new();
        snaps.insert(10, snap_with_ask(10, 101.0, 1.0));
        manager.append(1, 0, snaps, BTreeMap::new());

        let target = snap_with_ask(20, 101.0, 3.0);
        let report = manager.reconcile(1, 0, &target, 30);
        assert!(report.lifted);

        let history = manager.read(1, 0).unwrap();
        let final_snap = history.snapshots.get(&10).unwrap();
        assert_eq!(
            final_snap
                .asks
                .get(&ordered_float::OrderedFloat(101.0))
                .unwrap()
                .quantity,
            3.0
        );
        let (matches, discrepancies, _) = final_snap.compare(&target, 8);
        assert!(matches);
        assert!(discrepancies.is_empty());
    }

    #[test]
    fn begin_update_rejects_concurrent_caller() {
        let manager = HistoryManager::new(HistoryConfig {
            retention_ns: 100,
            depth: 5,
            volume_decimals: 8,
        });
        let first = manager.begin_update().unwrap();
        match manager.begin_update() {
            Err(UpdateError::AlreadyUpdating) => {}
            _ => panic!("expected AlreadyUpdating"),
        }
        drop(first);
        assert!(manager.begin_update().is_ok());
    }

    #[test]
    fn large_gap_drops_book_history() {
        let manager = HistoryManager::new(HistoryConfig {
            retention_ns: 100,
            depth: 5,
            volume_decimals: 8,
        });
        let mut snaps = BTreeMap::new();
        snaps.insert(0, snap_with_ask(0, 101.0, 1.0));
        manager.append(1, 0, snaps, BTreeMap::new());

        let target = snap_with_ask(5000, 101.0, 1.0);
        manager.reconcile(1, 0, &target, 5000);
        let history = manager.read(1, 0).unwrap();
        assert!(history.is_empty());
    }
}
