use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use oms_schemas::Side;

pub const MICROS_SCALE: i64 = 1_000_000;

/// Synthetic strategy id used to absorb positive drift between the broker's
/// real quantity and the sum of known strategy allocations.
pub const UNKNOWN_STRATEGY: &str = "_UNKNOWN_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Submitting,
    Working,
    Partial,
    Filled,
    Cancelled,
    Rejected,
    Expired,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
                | OrderStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopLimit,
    MarketableLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingOrder {
    pub broker_order_id: String,
    pub symbol: String,
    pub strategy_id: String,
    pub side: Side,
    pub qty: i64,
    pub filled_qty: i64,
    pub limit_price_micros: Option<i64>,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub submitted_at: DateTime<Utc>,
    pub cancel_after_secs: Option<i64>,
    pub branch: Option<String>,
    /// Sector this order reserved exposure against, if known at submit time.
    pub sector: Option<String>,
    /// Notional reserved in `SectorExposure` for this order; released when
    /// the order reaches a terminal state.
    pub reserved_notional_micros: i64,
}

impl WorkingOrder {
    pub fn remaining_qty(&self) -> i64 {
        (self.qty - self.filled_qty).max(0)
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        match self.cancel_after_secs {
            Some(secs) => (now - self.submitted_at).num_seconds() >= secs,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAllocation {
    pub strategy_id: String,
    pub qty: i64,
    pub cost_basis_micros: i64,
    pub entry_ts: Option<DateTime<Utc>>,
    pub soft_stop_micros: Option<i64>,
    pub time_stop: Option<DateTime<Utc>>,
}

impl StrategyAllocation {
    pub fn new(strategy_id: impl Into<String>) -> Self {
        StrategyAllocation {
            strategy_id: strategy_id.into(),
            qty: 0,
            cost_basis_micros: 0,
            entry_ts: None,
            soft_stop_micros: None,
            time_stop: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolPosition {
    pub symbol: String,
    pub real_qty: i64,
    pub avg_price_micros: i64,
    pub allocations: BTreeMap<String, StrategyAllocation>,
    pub hard_stop_micros: Option<i64>,
    pub entry_lock_owner: Option<String>,
    pub entry_lock_until: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub vi_cooldown_until: Option<DateTime<Utc>>,
    pub working_orders: Vec<WorkingOrder>,
    pub frozen: bool,
}

impl SymbolPosition {
    pub fn new(symbol: impl Into<String>) -> Self {
        SymbolPosition {
            symbol: symbol.into(),
            real_qty: 0,
            avg_price_micros: 0,
            allocations: BTreeMap::new(),
            hard_stop_micros: None,
            entry_lock_owner: None,
            entry_lock_until: None,
            cooldown_until: None,
            vi_cooldown_until: None,
            working_orders: Vec::new(),
            frozen: false,
        }
    }

    pub fn has_working_orders(&self) -> bool {
        !self.working_orders.is_empty()
    }

    pub fn working_qty(&self, strategy_id: Option<&str>, side: Option<Side>) -> i64 {
        self.working_orders
            .iter()
            .filter(|o| strategy_id.map_or(true, |s| o.strategy_id == s))
            .filter(|o| side.map_or(true, |s| o.side == s))
            .map(|o| o.remaining_qty())
            .sum()
    }

    pub fn total_allocated(&self) -> i64 {
        self.allocations.values().map(|a| a.qty).sum()
    }

    /// `real_qty - Σ allocations.qty`; positive means the broker holds more
    /// than any strategy claims, negative means less.
    pub fn allocation_drift(&self) -> i64 {
        self.real_qty - self.total_allocated()
    }

    pub fn get_allocation(&self, strategy_id: &str) -> Option<&StrategyAllocation> {
        self.allocations.get(strategy_id)
    }

    pub fn is_entry_locked(&self, now: DateTime<Utc>) -> bool {
        match self.entry_lock_until {
            Some(until) => now < until,
            None => false,
        }
    }

    pub fn can_strategy_enter(&self, strategy_id: &str, now: DateTime<Utc>) -> bool {
        if self.frozen {
            return false;
        }
        match (&self.entry_lock_owner, self.is_entry_locked(now)) {
            (Some(owner), true) => owner == strategy_id,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountState {
    pub equity_micros: i64,
    pub buyable_cash_micros: i64,
    pub daily_realized_pnl_micros: i64,
    pub daily_total_pnl_micros: i64,
    pub daily_pnl_pct: f64,
    pub safe_mode: bool,
    pub halt_new_entries: bool,
    pub flatten_in_progress: bool,
    pub current_regime: String,
}
