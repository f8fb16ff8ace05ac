//! Core data model: price levels, orders, snapshots, accounts, and the agent
//! instruction protocol. Shared by every subsystem (C1-C8).

pub mod account;
pub mod instruction;
pub mod l2_history;
pub mod price_level;
pub mod snapshot;

pub use account::{AgentAccount, Balance, Fees, Loan, OrderCurrency};
pub use instruction::{
    CancelOrderEntry, ClosePositionEntry, Instruction, InstructionKind, OrderDirection,
    PlaceOrderCommon, SettleFlag, Stp, TimeInForce,
};
pub use l2_history::L2History;
pub use price_level::{round_to, Cancellation, Order, PriceLevel, Side, Trade};
pub use snapshot::{BookEvent, EventStream, ExistingVolumes, L2Snapshot};
