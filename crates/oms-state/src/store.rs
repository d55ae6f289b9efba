use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::types::{AccountState, StrategyAllocation, SymbolPosition, WorkingOrder};

/// Thread-safe home for all position, allocation, working-order and
/// account-scalar state. Every mutator takes the write lock for the
/// duration of the operation; callers needing cross-field atomicity
/// (e.g. the intent pipeline) additionally hold a per-symbol mutex from
/// `oms-pipeline` around a whole sequence of calls.
#[derive(Debug, Default)]
pub struct StateStore {
    positions: RwLock<HashMap<String, SymbolPosition>>,
    account: RwLock<AccountState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_position(&self, symbol: &str) -> SymbolPosition {
        {
            let read = self.positions.read().await;
            if let Some(p) = read.get(symbol) {
                return p.clone();
            }
        }
        let mut write = self.positions.write().await;
        write
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolPosition::new(symbol))
            .clone()
    }

    pub async fn get_all_positions(&self) -> Vec<SymbolPosition> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn update_position<F>(&self, symbol: &str, f: F)
    where
        F: FnOnce(&mut SymbolPosition),
    {
        let mut write = self.positions.write().await;
        let pos = write
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolPosition::new(symbol));
        f(pos);
    }

    /// Adds `qty_delta` to the strategy's allocation; recomputes a
    /// share-weighted cost basis on positive deltas when `fill_price_micros`
    /// is given, and clears `entry_ts` once quantity reaches zero or below.
    pub async fn update_allocation(
        &self,
        symbol: &str,
        strategy_id: &str,
        qty_delta: i64,
        fill_price_micros: Option<i64>,
        now: DateTime<Utc>,
    ) {
        self.update_position(symbol, |pos| {
            let alloc = pos
                .allocations
                .entry(strategy_id.to_string())
                .or_insert_with(|| StrategyAllocation::new(strategy_id));

            if qty_delta > 0 {
                if let Some(price) = fill_price_micros {
                    let old_notional = alloc.cost_basis_micros * alloc.qty;
                    let new_notional = price * qty_delta;
                    let new_qty = alloc.qty + qty_delta;
                    alloc.cost_basis_micros = if new_qty > 0 {
                        (old_notional + new_notional) / new_qty
                    } else {
                        0
                    };
                }
                if alloc.entry_ts.is_none() {
                    alloc.entry_ts = Some(now);
                }
            }
            alloc.qty += qty_delta;
            if alloc.qty <= 0 {
                alloc.qty = alloc.qty.max(0);
                alloc.entry_ts = None;
            }
        })
        .await;
    }

    /// Atomic test-and-set: succeeds if no active lock exists, or the
    /// caller already owns it.
    pub async fn set_entry_lock(
        &self,
        symbol: &str,
        strategy_id: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut write = self.positions.write().await;
        let pos = write
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolPosition::new(symbol));
        let held_by_other = pos.is_entry_locked(now)
            && pos.entry_lock_owner.as_deref() != Some(strategy_id);
        if held_by_other {
            return false;
        }
        pos.entry_lock_owner = Some(strategy_id.to_string());
        pos.entry_lock_until = Some(until);
        true
    }

    pub async fn release_entry_lock(&self, symbol: &str, strategy_id: &str) {
        let mut write = self.positions.write().await;
        if let Some(pos) = write.get_mut(symbol) {
            if pos.entry_lock_owner.as_deref() == Some(strategy_id) {
                pos.entry_lock_owner = None;
                pos.entry_lock_until = None;
            }
        }
    }

    /// Updates a strategy's soft stop / time stop and the symbol's hard
    /// stop. Returns `false` if the strategy has no allocation to modify.
    pub async fn update_risk_stops(
        &self,
        symbol: &str,
        strategy_id: &str,
        soft_stop_micros: Option<i64>,
        hard_stop_micros: Option<i64>,
        time_stop: Option<DateTime<Utc>>,
    ) -> bool {
        let mut write = self.positions.write().await;
        let Some(pos) = write.get_mut(symbol) else {
            return false;
        };
        let Some(alloc) = pos.allocations.get_mut(strategy_id) else {
            return false;
        };
        if soft_stop_micros.is_some() {
            alloc.soft_stop_micros = soft_stop_micros;
        }
        if time_stop.is_some() {
            alloc.time_stop = time_stop;
        }
        if hard_stop_micros.is_some() {
            pos.hard_stop_micros = hard_stop_micros;
        }
        true
    }

    pub async fn add_working_order(&self, symbol: &str, order: WorkingOrder) {
        self.update_position(symbol, |pos| pos.working_orders.push(order))
            .await;
    }

    pub async fn remove_working_order(&self, symbol: &str, broker_order_id: &str) {
        self.update_position(symbol, |pos| {
            pos.working_orders
                .retain(|o| o.broker_order_id != broker_order_id);
        })
        .await;
    }

    pub async fn get_working_orders(&self, symbol: Option<&str>) -> Vec<WorkingOrder> {
        let read = self.positions.read().await;
        match symbol {
            Some(sym) => read
                .get(sym)
                .map(|p| p.working_orders.clone())
                .unwrap_or_default(),
            None => read
                .values()
                .flat_map(|p| p.working_orders.clone())
                .collect(),
        }
    }

    pub async fn get_allocations_for_strategy(
        &self,
        strategy_id: &str,
    ) -> HashMap<String, StrategyAllocation> {
        let read = self.positions.read().await;
        read.iter()
            .filter_map(|(sym, pos)| {
                pos.allocations
                    .get(strategy_id)
                    .filter(|a| a.qty > 0)
                    .map(|a| (sym.clone(), a.clone()))
            })
            .collect()
    }

    pub async fn record_realized_pnl(&self, delta_micros: i64) {
        let mut account = self.account.write().await;
        account.daily_realized_pnl_micros += delta_micros;
    }

    /// Recomputes `daily_total_pnl = realized + Σ (price - avg_price) * real_qty`.
    pub async fn update_daily_pnl(&self, prices: &HashMap<String, i64>) {
        let positions = self.positions.read().await;
        let mut unrealized = 0i64;
        for pos in positions.values() {
            if let Some(price) = prices.get(&pos.symbol) {
                unrealized += (price - pos.avg_price_micros) * pos.real_qty;
            }
        }
        drop(positions);
        let mut account = self.account.write().await;
        account.daily_total_pnl_micros = account.daily_realized_pnl_micros + unrealized;
        if account.equity_micros > 0 {
            account.daily_pnl_pct =
                account.daily_total_pnl_micros as f64 / account.equity_micros as f64;
        }
    }

    pub async fn account(&self) -> AccountState {
        self.account.read().await.clone()
    }

    pub async fn update_account<F>(&self, f: F)
    where
        F: FnOnce(&mut AccountState),
    {
        let mut write = self.account.write().await;
        f(&mut write);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn entry_lock_is_exclusive() {
        let store = StateStore::new();
        let now = Utc::now();
        assert!(
            store
                .set_entry_lock("005930", "KMP", now + Duration::seconds(60), now)
                .await
        );
        assert!(
            !store
                .set_entry_lock("005930", "KPR", now + Duration::seconds(60), now)
                .await
        );
    }

    #[tokio::test]
    async fn release_by_non_owner_is_noop() {
        let store = StateStore::new();
        let now = Utc::now();
        store
            .set_entry_lock("005930", "KMP", now + Duration::seconds(60), now)
            .await;
        store.release_entry_lock("005930", "KPR").await;
        let pos = store.get_position("005930").await;
        assert_eq!(pos.entry_lock_owner.as_deref(), Some("KMP"));
    }

    #[tokio::test]
    async fn cost_basis_is_share_weighted_average() {
        let store = StateStore::new();
        let now = Utc::now();
        store
            .update_allocation("005930", "KMP", 100, Some(70_000 * 1_000_000), now)
            .await;
        store
            .update_allocation("005930", "KMP", 50, Some(73_000 * 1_000_000), now)
            .await;
        let pos = store.get_position("005930").await;
        let alloc = pos.get_allocation("KMP").unwrap();
        assert_eq!(alloc.qty, 150);
        let expected = (70_000 * 100 + 73_000 * 50) / 150 * 1_000_000;
        assert_eq!(alloc.cost_basis_micros, expected);
    }

    #[tokio::test]
    async fn allocation_drift_detects_unallocated_broker_qty() {
        let store = StateStore::new();
        let now = Utc::now();
        store.update_position("005930", |p| p.real_qty = 150).await;
        store
            .update_allocation("005930", "KMP", 100, Some(70_000 * 1_000_000), now)
            .await;
        let pos = store.get_position("005930").await;
        assert_eq!(pos.allocation_drift(), 50);
    }
}
