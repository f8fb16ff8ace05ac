//! L2 price level and order primitives shared by replay, history, and scoring.

use serde::{Deserialize, Serialize};

/// Side of the book on which an order or cancellation applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Side debited by a trade given the aggressing (taker) direction.
    ///
    /// A buy-initiated trade (taker direction 0) lifts the ask side; a
    /// sell-initiated trade (taker direction 1) hits the bid side.
    pub fn from_taker_direction(direction: u8) -> Side {
        if direction == 0 {
            Side::Ask
        } else {
            Side::Bid
        }
    }
}

/// A single open order resting on the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub client_id: Option<u64>,
    pub timestamp: i64,
    pub quantity: f64,
    pub side: Side,
    /// `None` for a market order.
    pub price: Option<f64>,
    pub leverage: f64,
}

impl Order {
    pub fn is_market(&self) -> bool {
        self.price.is_none()
    }
}

/// A price level on one side of the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
    pub orders: Option<Vec<Order>>,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self {
            price,
            quantity,
            orders: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.quantity == 0.0
    }
}

/// A completed trade. Append-only once recorded in an event stream or history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    /// Direction of the aggressing order: 0 = buy-initiated, 1 = sell-initiated.
    pub side: u8,
    pub timestamp: i64,
    pub quantity: f64,
    pub price: f64,
    pub taker_id: u64,
    pub taker_agent_id: u32,
    pub taker_fee: Option<f64>,
    pub maker_id: u64,
    pub maker_agent_id: u32,
    pub maker_fee: Option<f64>,
}

/// An order cancellation. `quantity == None` means cancel the full remainder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub order_id: u64,
    pub timestamp: Option<i64>,
    pub price: Option<f64>,
    pub quantity: Option<f64>,
}

pub fn round_to(value: f64, decimals: u8) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
