//! L2 snapshot and per-step event stream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::price_level::{Cancellation, Order, PriceLevel, Side, Trade};

/// A single event replayed against a book, ordered by `(timestamp, sequence)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BookEvent {
    Order(Order),
    Trade(Trade),
    Cancellation(Cancellation),
}

impl BookEvent {
    pub fn timestamp(&self) -> i64 {
        match self {
            BookEvent::Order(o) => o.timestamp,
            BookEvent::Trade(t) => t.timestamp,
            BookEvent::Cancellation(c) => c.timestamp.unwrap_or(i64::MAX),
        }
    }
}

/// Ordered sequence of book events for one book over one step, sorted by
/// `(timestamp, sequence)` before replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStream {
    events: Vec<(u64, BookEvent)>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sequence: u64, event: BookEvent) {
        self.events.push((sequence, event));
    }

    /// Events in timestamp order, ties broken by sequence.
    pub fn ordered(&self) -> Vec<&BookEvent> {
        let mut indexed: Vec<&(u64, BookEvent)> = self.events.iter().collect();
        indexed.sort_by_key(|(seq, ev)| (ev.timestamp(), *seq));
        indexed.into_iter().map(|(_, ev)| ev).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// A level-2 snapshot of one book at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2Snapshot {
    pub timestamp: i64,
    pub bids: BTreeMap<ordered_float::OrderedFloat<f64>, PriceLevel>,
    pub asks: BTreeMap<ordered_float::OrderedFloat<f64>, PriceLevel>,
}

impl L2Snapshot {
    pub fn empty(timestamp: i64) -> Self {
        Self {
            timestamp,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    fn side_map(&self, side: Side) -> &BTreeMap<ordered_float::OrderedFloat<f64>, PriceLevel> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn side_map_mut(
        &mut self,
        side: Side,
    ) -> &mut BTreeMap<ordered_float::OrderedFloat<f64>, PriceLevel> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.keys().next_back().map(|k| k.0)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.keys().next().map(|k| k.0)
    }

    /// Nth bid level, sorted descending by price (index 0 = best bid).
    pub fn bid_level(&self, index: usize) -> Option<&PriceLevel> {
        self.bids.values().rev().nth(index)
    }

    /// Nth ask level, sorted ascending by price (index 0 = best ask).
    pub fn ask_level(&self, index: usize) -> Option<&PriceLevel> {
        self.asks.values().nth(index)
    }

    /// `(total_bid_volume - total_ask_volume) / (total_bid_volume + total_ask_volume)`
    /// over the top `depth` levels of each side (all levels if `depth` is `None`).
    pub fn imbalance(&self, depth: Option<usize>) -> f64 {
        let bid_vol: f64 = self
            .bids
            .values()
            .rev()
            .take(depth.unwrap_or(self.bids.len()))
            .map(|l| l.quantity)
            .sum();
        let ask_vol: f64 = self
            .asks
            .values()
            .take(depth.unwrap_or(self.asks.len()))
            .map(|l| l.quantity)
            .sum();
        (bid_vol - ask_vol) / (bid_vol + ask_vol)
    }

    /// Add (or remove, for negative `qty`) quantity at `price` on `side`,
    /// creating the level if absent and dropping it when the quantity rounds
    /// to zero or below.
    pub fn adjust(&mut self, side: Side, price: f64, delta_qty: f64, volume_decimals: u8) {
        let key = ordered_float::OrderedFloat(price);
        let map = self.side_map_mut(side);
        let new_qty = super::price_level::round_to(
            map.get(&key).map(|l| l.quantity).unwrap_or(0.0) + delta_qty,
            volume_decimals,
        );
        if new_qty == 0.0 {
            map.remove(&key);
        } else {
            map.entry(key)
                .and_modify(|l| l.quantity = new_qty)
                .or_insert_with(|| PriceLevel::new(price, new_qty));
        }
    }

    pub fn has_level(&self, side: Side, price: f64) -> bool {
        self.side_map(side)
            .contains_key(&ordered_float::OrderedFloat(price))
    }

    /// Truncate each side to `depth` levels after sorting (idempotent).
    pub fn sort(&mut self, depth: Option<usize>) -> &mut Self {
        if let Some(depth) = depth {
            if self.bids.len() > depth {
                let keep: Vec<_> = self.bids.keys().rev().take(depth).cloned().collect();
                self.bids.retain(|k, _| keep.contains(k));
            }
            if self.asks.len() > depth {
                let keep: Vec<_> = self.asks.keys().take(depth).cloned().collect();
                self.asks.retain(|k, _| keep.contains(k));
            }
        }
        self
    }

    /// Per-side, per-price volume that must be present in `self` for it to
    /// match `target`, plus a list of textual discrepancies. See
    /// `HistoryManager`'s reconciliation protocol.
    pub fn compare(
        &self,
        target: &L2Snapshot,
        volume_decimals: u8,
    ) -> (bool, Vec<String>, ExistingVolumes) {
        let mut discrepancies = Vec::new();
        let mut existing = ExistingVolumes::default();

        for side in [Side::Bid, Side::Ask] {
            let mine = self.side_map(side);
            let theirs = target.side_map(side);
            let label = if side == Side::Bid { "BID" } else { "ASK" };

            for (price, level) in mine {
                match theirs.get(price) {
                    Some(target_level) => {
                        if level.quantity != target_level.quantity {
                            discrepancies.push(format!(
                                "{label} : RECON {}@{} vs. TARGET {}@{}",
                                level.quantity, price.0, target_level.quantity, price.0
                            ));
                        }
                        if level.quantity < target_level.quantity {
                            existing.set(
                                side,
                                price.0,
                                super::price_level::round_to(
                                    target_level.quantity - level.quantity,
                                    volume_decimals,
                                ),
                            );
                        }
                    }
                    None => {
                        discrepancies.push(format!(
                            "{label} : RECON {}@{} vs. TARGET 0.0@{}",
                            level.quantity, price.0, price.0
                        ));
                        if level.quantity < 0.0 {
                            existing.set(
                                side,
                                price.0,
                                super::price_level::round_to(-level.quantity, volume_decimals),
                            );
                        }
                    }
                }
            }
            for (price, target_level) in theirs {
                if !mine.contains_key(price) {
                    discrepancies.push(format!(
                        "{label} : RECON 0.0@{} vs. TARGET {}@{}",
                        price.0, target_level.quantity, price.0
                    ));
                    existing.set(side, price.0, target_level.quantity);
                }
            }
        }

        (discrepancies.is_empty(), discrepancies, existing)
    }

    /// Apply `existing` volume corrections to every level they name, then
    /// re-truncate to `depth`.
    pub fn reconcile(
        &mut self,
        existing: &ExistingVolumes,
        volume_decimals: u8,
        depth: Option<usize>,
    ) -> &mut Self {
        for (side, adjustments) in [(Side::Bid, &existing.bid), (Side::Ask, &existing.ask)] {
            for (&price, &volume) in adjustments {
                self.adjust(side, price.0, volume, volume_decimals);
            }
        }
        self.sort(depth)
    }
}

/// Per-price volume corrections discovered during reconciliation, keyed by side.
#[derive(Debug, Clone, Default)]
pub struct ExistingVolumes {
    pub bid: BTreeMap<ordered_float::OrderedFloat<f64>, f64>,
    pub ask: BTreeMap<ordered_float::OrderedFloat<f64>, f64>,
}

impl ExistingVolumes {
    pub fn set(&mut self, side: Side, price: f64, volume: f64) {
        let key = ordered_float::OrderedFloat(price);
        match side {
            Side::Bid => self.bid.insert(key, volume),
            Side::Ask => self.ask.insert(key, volume),
        };
    }

    pub fn is_empty(&self) -> bool {
        self.bid.is_empty() && self.ask.is_empty()
    }
}
