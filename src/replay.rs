//! C1: SnapshotReplayer — deterministic reconstruction of per-event L2
//! snapshots from a prior snapshot and an ordered event stream.
//!
//! Grounded on `taos.im.utils.history.historical_snapshots` (the Python
//! implementation this was distilled from): for each event, clone the
//! previous snapshot, apply the event's effect, and record the result under
//! the event's own timestamp before continuing from it.

use std::collections::BTreeMap;

use crate::model::{BookEvent, EventStream, L2Snapshot, Side, Trade};

/// Replay `events` on top of `prev`, producing every intermediate snapshot
/// and the trades observed along the way. Pure function of its inputs:
/// identical `(prev, events, volume_decimals)` always yields byte-identical
/// output (Testable Property 1).
pub fn replay(
    prev: &L2Snapshot,
    events: &EventStream,
    volume_decimals: u8,
) -> (BTreeMap<i64, L2Snapshot>, BTreeMap<i64, Trade>) {
    let mut snapshots = BTreeMap::new();
    let mut trades = BTreeMap::new();
    let mut current = prev.clone();

    for event in events.ordered() {
        apply_event(&mut current, event, volume_decimals);
        let ts = event.timestamp();
        current.timestamp = ts;
        if let BookEvent::Trade(trade) = event {
            trades.insert(ts, trade.clone());
        }
        snapshots.insert(ts, current.clone());
    }

    (snapshots, trades)
}

fn apply_event(snapshot: &mut L2Snapshot, event: &BookEvent, volume_decimals: u8) {
    match event {
        BookEvent::Order(order) => {
            let price = match order.price {
                Some(p) => p,
                None => return, // market orders never rest on the book
            };
            snapshot.adjust(order.side, price, order.quantity, volume_decimals);
        }
        BookEvent::Trade(trade) => {
            // The aggressing order's direction determines which side is
            // debited: a buy-initiated trade lifts resting asks, a
            // sell-initiated trade hits resting bids.
            let side = Side::from_taker_direction(trade.side);
            snapshot.adjust(side, trade.price, -trade.quantity, volume_decimals);
        }
        BookEvent::Cancellation(cancellation) => {
            let qty = match cancellation.quantity {
                Some(q) => q,
                None => return, // full-remainder cancellations with no price carry no level delta here
            };
            let price = match cancellation.price {
                Some(p) => p,
                None => return,
            };
            let side = resolve_cancellation_side(snapshot, price);
            snapshot.adjust(side, price, -qty, volume_decimals);
        }
    }
}

/// `price >= best_ask` decides the side for a cancellation with no
/// explicit side. When `best_ask` is undefined (one-sided book), try ASK
/// first, then BID — the resolution the source leaves undefined (§9).
fn resolve_cancellation_side(snapshot: &L2Snapshot, price: f64) -> Side {
    match snapshot.best_ask() {
        Some(best_ask) => {
            if price >= best_ask {
                Side::Ask
            } else {
                Side::Bid
            }
        }
        None => {
            if snapshot.has_level(Side::Ask, price) {
                Side::Ask
            } else {
                Side::Bid
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cancellation, Order, PriceLevel};

    fn make_prev_with_bid(price: f64, qty: f64) -> L2Snapshot {
        let mut snap = L2Snapshot::empty(0);
        snap.bids.insert(
            ordered_float::OrderedFloat(price),
            PriceLevel::new(price, qty),
        );
        snap
    }

    fn order_event(ts: i64, side: Side, price: f64, qty: f64) -> BookEvent {
        BookEvent::Order(Order {
            id: 1,
            client_id: None,
            timestamp: ts,
            quantity: qty,
            side,
            price: Some(price),
            leverage: 0.0,
        })
    }

    fn trade_event(ts: i64, taker_side: u8, price: f64, qty: f64) -> BookEvent {
        BookEvent::Trade(Trade {
            id: 1,
            side: taker_side,
            timestamp: ts,
            quantity: qty,
            price,
            taker_id: 1,
            taker_agent_id: 1,
            taker_fee: None,
            maker_id: 2,
            maker_agent_id: 2,
            maker_fee: None,
        })
    }

    /// Scenario 1 (§8): single bid 100@1.0, then an ASK order at 100 for
    /// 1.0, then a trade of 1.0@100 on the ASK side. After the trade the
    /// bid level is untouched, the ask level empties, and the trade is
    /// recorded at its event timestamp.
    #[test]
    fn empty_book_replay_scenario() {
        let prev = make_prev_with_bid(100.0, 1.0);
        let mut events = EventStream::new();
        events.push(1, order_event(10, Side::Ask, 100.0, 1.0));
        events.push(2, trade_event(20, 0, 100.0, 1.0));

        let (snapshots, trades) = replay(&prev, &events, 8);

        let final_snap = snapshots.get(&20).unwrap();
        assert!(final_snap.asks.is_empty());
        assert!(final_snap
            .bids
            .contains_key(&ordered_float::OrderedFloat(100.0)));
        assert_eq!(trades.get(&20).unwrap().quantity, 1.0);
    }

    #[test]
    fn replay_is_deterministic() {
        let prev = make_prev_with_bid(100.0, 1.0);
        let mut events = EventStream::new();
        events.push(1, order_event(10, Side::Ask, 101.0, 2.0));
        events.push(2, trade_event(20, 0, 101.0, 0.5));

        let (a, _) = replay(&prev, &events, 8);
        let (b, _) = replay(&prev, &events, 8);
        assert_eq!(a, b);
    }

    #[test]
    fn cancellation_heuristic_falls_back_to_ask_first_when_one_sided() {
        let mut snap = L2Snapshot::empty(0);
        snap.asks.insert(
            ordered_float::OrderedFloat(105.0),
            PriceLevel::new(105.0, 2.0),
        );
        let cancellation = BookEvent::Cancellation(Cancellation {
            order_id: 1,
            timestamp: Some(10),
            price: Some(105.0),
            quantity: Some(1.0),
        });
        apply_event(&mut snap, &cancellation, 8);
        assert_eq!(
            snap.asks
                .get(&ordered_float::OrderedFloat(105.0))
                .unwrap()
                .quantity,
            1.0
        );
    }

    #[test]
    fn order_quantities_accumulate_at_existing_level() {
        let prev = make_prev_with_bid(100.0, 1.0);
        let mut events = EventStream::new();
        events.push(1, order_event(10, Side::Bid, 100.0, 0.5));

        let (snapshots, _) = replay(&prev, &events, 8);
        let snap = snapshots.get(&10).unwrap();
        assert_eq!(
            snap.bids
                .get(&ordered_float::OrderedFloat(100.0))
                .unwrap()
                .quantity,
            1.5
        );
    }
}
