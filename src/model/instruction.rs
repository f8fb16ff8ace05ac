//! Agent instruction protocol: the discriminated union validated agent
//! responses are reduced to and the merged batch returned to the simulator.

use serde::{Deserialize, Serialize};

use super::account::OrderCurrency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    Buy,
    Sell,
}

/// Self-trade prevention strategy. Defaults to `CancelOldest` when an agent
/// omits it (§4.4 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Stp {
    NoStp,
    #[default]
    CancelOldest,
    CancelNewest,
    CancelBoth,
    DecreaseCancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    #[default]
    Gtc,
    Gtt,
    Ioc,
    Fok,
}

/// Strategy for repaying outstanding margin loans with order proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SettleFlag {
    #[default]
    None,
    Fifo,
    OrderId(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderCommon {
    pub book_id: u32,
    pub direction: OrderDirection,
    pub quantity: f64,
    pub client_order_id: Option<u32>,
    #[serde(default)]
    pub stp: Stp,
    #[serde(default)]
    pub currency: OrderCurrency,
    #[serde(default)]
    pub leverage: f64,
    #[serde(default)]
    pub settle_flag: SettleFlag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrderEntry {
    pub order_id: u32,
    /// `None` cancels the full remaining size.
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosePositionEntry {
    pub order_id: u32,
    pub volume: Option<f64>,
}

/// An instruction submitted by an agent (or, for `ResetAgent`, by the
/// validator itself). `agent_id` and `delay` apply uniformly; `delay` starts
/// at 0 and is populated by `DelayAssigner` before the merged batch is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub agent_id: u32,
    pub delay: u64,
    pub kind: InstructionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstructionKind {
    PlaceMarket {
        common: PlaceOrderCommon,
    },
    PlaceLimit {
        common: PlaceOrderCommon,
        price: f64,
        #[serde(default)]
        post_only: bool,
        #[serde(default)]
        time_in_force: TimeInForce,
        expiry_period: Option<u64>,
    },
    Cancel {
        book_id: u32,
        cancellations: Vec<CancelOrderEntry>,
    },
    ClosePosition {
        book_id: u32,
        closes: Vec<ClosePositionEntry>,
    },
    ResetAgent {
        agent_ids: Vec<u32>,
    },
}

impl Instruction {
    pub fn book_id(&self) -> Option<u32> {
        match &self.kind {
            InstructionKind::PlaceMarket { common } => Some(common.book_id),
            InstructionKind::PlaceLimit { common, .. } => Some(common.book_id),
            InstructionKind::Cancel { book_id, .. } => Some(*book_id),
            InstructionKind::ClosePosition { book_id, .. } => Some(*book_id),
            InstructionKind::ResetAgent { .. } => None,
        }
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self.kind, InstructionKind::Cancel { .. })
    }

    pub fn is_reset(&self) -> bool {
        matches!(self.kind, InstructionKind::ResetAgent { .. })
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            InstructionKind::PlaceMarket { .. } => "PLACE_ORDER_MARKET",
            InstructionKind::PlaceLimit { .. } => "PLACE_ORDER_LIMIT",
            InstructionKind::Cancel { .. } => "CANCEL_ORDERS",
            InstructionKind::ClosePosition { .. } => "CLOSE_POSITIONS",
            InstructionKind::ResetAgent { .. } => "RESET_AGENT",
        }
    }
}
