//! Agent trading account, balances, loans, and fee schedule.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::price_level::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderCurrency {
    #[default]
    Base,
    Quote,
}

/// Balance for a single currency leg of an account.
///
/// Invariant: `free + reserved == total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub total: f64,
    pub free: f64,
    pub reserved: f64,
    pub initial: Option<f64>,
}

impl Balance {
    pub fn is_consistent(&self) -> bool {
        (self.free + self.reserved - self.total).abs() < 1e-9
    }
}

/// An open margin loan associated with a resting order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub order_id: u64,
    pub amount: f64,
    pub currency: OrderCurrency,
    pub base_collateral: f64,
    pub quote_collateral: f64,
}

/// Per-account fee schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fees {
    pub volume_traded: f64,
    pub maker_fee_rate: f64,
    pub taker_fee_rate: f64,
}

/// An agent's trading account on a single book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAccount {
    pub agent_id: u32,
    pub book_id: u32,
    pub base_balance: Balance,
    pub quote_balance: Balance,
    pub base_loan: f64,
    pub quote_loan: f64,
    pub base_collateral: f64,
    pub quote_collateral: f64,
    pub orders: Vec<Order>,
    pub loans: HashMap<u64, Loan>,
    pub fees: Option<Fees>,
    pub traded_volume: Option<f64>,
}

impl AgentAccount {
    /// `own_quote = quote.total - quote_loan + quote_collateral`
    pub fn own_quote(&self) -> f64 {
        self.quote_balance.total - self.quote_loan + self.quote_collateral
    }

    /// `own_base = base.total - base_loan + base_collateral`
    pub fn own_base(&self) -> f64 {
        self.base_balance.total - self.base_loan + self.base_collateral
    }

    /// Quote-denominated inventory value relative to `initial_wealth`, per §4.6 step 1.
    pub fn inventory_value(&self, mid_price: f64, initial_wealth: f64) -> f64 {
        self.own_quote() + mid_price * self.own_base() - initial_wealth
    }
}
