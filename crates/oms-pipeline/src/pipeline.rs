use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use oms_arbitration::{ArbitrationEngine, ArbitrationResult};
use oms_broker::{BrokerAdapter, SubmitOrderRequest};
use oms_planner::OrderPlanner;
use oms_risk::{RequestKind as RiskRequestKind, RiskCheckInput, RiskConfig, RiskState, RiskVerdict, Regime, SectorExposure};
use oms_schemas::{Intent, IntentKind, IntentRequest, IntentResult, Side};
use oms_state::{OrderStatus, OrderType, StateStore, WorkingOrder};

use crate::idempotency::IdempotencyStore;
use crate::price::PriceSource;
use crate::symbol_lock::SymbolLocks;

pub struct OmsPipeline {
    pub store: Arc<StateStore>,
    risk_cfg: RiskConfig,
    risk_state: RwLock<RiskState>,
    sectors: RwLock<SectorExposure>,
    arbitration: ArbitrationEngine,
    broker: Arc<dyn BrokerAdapter>,
    prices: Arc<dyn PriceSource>,
    idempotency: IdempotencyStore,
    symbol_locks: SymbolLocks,
    paused_strategies: RwLock<HashSet<String>>,
    persistence: Option<Arc<oms_db::OmsPersistence>>,
}

impl OmsPipeline {
    pub fn new(
        store: Arc<StateStore>,
        risk_cfg: RiskConfig,
        arbitration: ArbitrationEngine,
        broker: Arc<dyn BrokerAdapter>,
        prices: Arc<dyn PriceSource>,
    ) -> Self {
        let trade_date = oms_schemas::kst_trade_date(Utc::now());
        OmsPipeline {
            store,
            risk_cfg,
            risk_state: RwLock::new(RiskState::new(trade_date)),
            sectors: RwLock::new(SectorExposure::new()),
            arbitration,
            broker,
            prices,
            idempotency: IdempotencyStore::new(),
            symbol_locks: SymbolLocks::new(),
            paused_strategies: RwLock::new(HashSet::new()),
            persistence: None,
        }
    }

    /// Attaches a database-backed write-through log; every intent, order
    /// and risk-flag change records here in addition to the in-memory
    /// `StateStore`. Absent when no database is configured — the pipeline
    /// then runs exactly as it did before persistence existed.
    pub fn with_persistence(mut self, persistence: Arc<oms_db::OmsPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub async fn pause_strategy(&self, strategy_id: &str) {
        self.paused_strategies.write().await.insert(strategy_id.to_string());
    }

    pub async fn resume_strategy(&self, strategy_id: &str) {
        self.paused_strategies.write().await.remove(strategy_id);
    }

    pub async fn set_safe_mode(&self, enabled: bool) {
        self.risk_state.write().await.safe_mode = enabled;
        self.sync_flags_to_persistence().await;
    }

    /// Applies warm-loaded `safe_mode`/`halted` flags at startup, without
    /// re-writing them back to persistence they were just read from.
    pub async fn restore_risk_flags(&self, safe_mode: bool, halted: bool) {
        let mut state = self.risk_state.write().await;
        state.safe_mode = safe_mode;
        state.halted = halted;
    }

    async fn sync_flags_to_persistence(&self) {
        let Some(db) = &self.persistence else { return };
        let state = self.risk_state.read().await;
        let regime = self.store.account().await.current_regime;
        db.sync_oms_flags(state.safe_mode, state.halted, &regime).await;
    }

    pub fn risk_cfg(&self) -> &RiskConfig {
        &self.risk_cfg
    }

    /// `(safe_mode, halted)` for health reporting and EOD reset.
    pub async fn risk_flags(&self) -> (bool, bool) {
        let state = self.risk_state.read().await;
        (state.safe_mode, state.halted)
    }

    /// Clears the daily circuit-breaker latch; used by end-of-day cleanup.
    pub async fn clear_halt(&self) {
        self.risk_state.write().await.halted = false;
    }

    /// Single entry point: never propagates an error to the caller. Every
    /// internal fallible step is converted into a `REJECTED` `IntentResult`
    /// before it escapes.
    pub async fn submit_intent(&self, req: IntentRequest) -> IntentResult {
        let now = Utc::now();
        let intent = Intent::new(req, now);

        if let Some(cached) = self.idempotency.get(&intent.idempotency_key).await {
            return cached;
        }

        if let Err(msg) = intent.validate(now) {
            return IntentResult::rejected(&intent, msg);
        }

        let _guard = self.symbol_locks.acquire(&intent.symbol).await;
        let result = self.process_intent(&intent, now).await;
        self.idempotency.put_if_cacheable(&result).await;
        if let Some(db) = &self.persistence {
            db.record_intent(&intent, &result).await;
        }
        result
    }

    async fn process_intent(&self, intent: &Intent, now: chrono::DateTime<Utc>) -> IntentResult {
        match intent.kind {
            IntentKind::CancelOrders => self.handle_cancel_orders(intent).await,
            IntentKind::ModifyRisk => self.handle_modify_risk(intent).await,
            _ => self.plan_and_execute(intent, now).await,
        }
    }

    async fn handle_cancel_orders(&self, intent: &Intent) -> IntentResult {
        let orders: Vec<_> = self
            .store
            .get_working_orders(Some(&intent.symbol))
            .await
            .into_iter()
            .filter(|o| o.strategy_id == intent.strategy_id)
            .collect();

        let mut cancelled = 0u32;
        for order in &orders {
            let result = self
                .broker
                .cancel_order(&order.broker_order_id, &order.symbol, order.branch.as_deref())
                .await;
            if result.success {
                self.store
                    .remove_working_order(&order.symbol, &order.broker_order_id)
                    .await;
                cancelled += 1;
            }
        }
        self.store.release_entry_lock(&intent.symbol, &intent.strategy_id).await;
        IntentResult::executed(intent, format!("Cancelled {cancelled} order(s)"), None)
    }

    async fn handle_modify_risk(&self, intent: &Intent) -> IntentResult {
        let pos = self.store.get_position(&intent.symbol).await;
        if pos.get_allocation(&intent.strategy_id).is_none() {
            return IntentResult::rejected(intent, "no allocation to modify");
        }
        self.store
            .update_risk_stops(
                &intent.symbol,
                &intent.strategy_id,
                intent.risk.soft_stop_micros,
                intent.risk.hard_stop_micros,
                intent.constraints.expiry,
            )
            .await;
        IntentResult::executed(intent, "risk parameters updated", None)
    }

    async fn plan_and_execute(&self, intent: &Intent, now: chrono::DateTime<Utc>) -> IntentResult {
        let pos = self.store.get_position(&intent.symbol).await;

        let (side, qty, risk_kind) = match self.resolve_side_and_qty(intent, &pos) {
            SideQty::Plan(side, qty, kind) => (side, qty, kind),
            SideQty::RedirectToCancel => return self.handle_cancel_orders(intent).await,
            SideQty::AlreadyAtTarget => return IntentResult::executed(intent, "already at target", None),
            SideQty::Rejected(msg) => return IntentResult::rejected(intent, msg),
        };

        if qty <= 0 {
            return IntentResult::rejected(intent, "non-positive quantity after resolution");
        }

        let price = self.prices.current_price_micros(&intent.symbol).await;

        let risk_verdict = if risk_kind == RiskRequestKind::Entry {
            let Some(price) = price else {
                return IntentResult::deferred(intent, "no price available for risk sizing", None);
            };
            self.evaluate_entry_risk(intent, qty, price, now).await
        } else {
            RiskVerdict::Approve
        };

        let (qty, modified_qty) = match risk_verdict {
            RiskVerdict::Approve => (qty, None),
            RiskVerdict::Modify { qty: scaled, .. } => (scaled, Some(scaled)),
            RiskVerdict::Reject { reason, cooldown_secs } => {
                return IntentResult::rejected(intent, format!("risk rejected: {reason:?} cooldown={cooldown_secs:?}"));
            }
            RiskVerdict::Defer { reason } => {
                return IntentResult::deferred(intent, format!("risk deferred: {reason:?}"), None);
            }
        };

        self.arbitration.add_pending(&intent.symbol, intent.kind).await;
        let decision = self
            .arbitration
            .arbitrate(&self.store, intent.kind, &intent.strategy_id, &intent.symbol, now)
            .await;
        self.arbitration.remove_pending(&intent.symbol, intent.kind).await;

        match decision.result {
            ArbitrationResult::Cancel => return IntentResult::rejected(intent, decision.reason),
            ArbitrationResult::Defer => return IntentResult::deferred(intent, decision.reason, decision.defer_until),
            ArbitrationResult::Proceed => {}
        }

        let current_price = price.unwrap_or(0);
        let plan = if intent.kind == IntentKind::Exit || intent.kind == IntentKind::Flatten {
            OrderPlanner::create_exit_plan(side, qty)
        } else {
            OrderPlanner::create_plan(
                side,
                qty,
                intent.urgency,
                current_price,
                intent.constraints.stop_price_micros,
                intent.constraints.limit_price_micros,
            )
        };

        let submit_req = SubmitOrderRequest {
            symbol: &intent.symbol,
            side: plan.side,
            qty: plan.qty,
            order_type: plan.order_type,
            limit_price_micros: plan.limit_price_micros,
            stop_price_micros: plan.stop_price_micros,
        };

        // Reserve sector exposure ahead of submit so a contending entry
        // placed before this order fills can't jointly overshoot the cap.
        let (sector, reserved_notional_micros) = if risk_kind == RiskRequestKind::Entry {
            let sector = self.sectors.read().await.sector_of(&intent.symbol).cloned();
            let notional = plan.qty * current_price.max(1);
            if let Some(s) = &sector {
                self.sectors.write().await.reserve_sector(s, notional);
            }
            (sector, notional)
        } else {
            (None, 0)
        };

        let submit = oms_broker::submit_with_retry(self.broker.as_ref(), submit_req, None).await;

        if !submit.success {
            if let Some(s) = &sector {
                self.sectors.write().await.unreserve_sector(s, reserved_notional_micros);
            }
            if intent.kind == IntentKind::Enter {
                self.store.release_entry_lock(&intent.symbol, &intent.strategy_id).await;
            }
            return IntentResult::rejected(intent, submit.message.unwrap_or_else(|| submit.error.to_string()));
        }

        let broker_order_id = submit.order_id.clone().unwrap_or_default();
        let working_order = WorkingOrder {
            broker_order_id: broker_order_id.clone(),
            symbol: intent.symbol.clone(),
            strategy_id: intent.strategy_id.clone(),
            side: plan.side,
            qty: plan.qty,
            filled_qty: 0,
            limit_price_micros: plan.limit_price_micros,
            order_type: plan.order_type,
            status: OrderStatus::Working,
            submitted_at: now,
            cancel_after_secs: Some(plan.cancel_after_secs),
            branch: None,
            sector,
            reserved_notional_micros,
        };
        self.store
            .add_working_order(&intent.symbol, working_order.clone())
            .await;
        if let Some(db) = &self.persistence {
            db.record_order(&working_order).await;
        }

        info!(symbol = %intent.symbol, strategy = %intent.strategy_id, order_id = %broker_order_id, "submitted order");
        let mut result = IntentResult::executed(intent, "order submitted", Some(broker_order_id));
        result.modified_qty = modified_qty;
        result
    }

    fn resolve_side_and_qty(&self, intent: &Intent, pos: &oms_state::SymbolPosition) -> SideQty {
        match intent.kind {
            IntentKind::Enter => SideQty::Plan(Side::Buy, intent.desired_qty.unwrap_or(0), RiskRequestKind::Entry),
            IntentKind::Reduce => SideQty::Plan(Side::Sell, intent.desired_qty.unwrap_or(0).abs(), RiskRequestKind::Reduce),
            IntentKind::Exit | IntentKind::Flatten => {
                let alloc_qty = pos.get_allocation(&intent.strategy_id).map(|a| a.qty).unwrap_or(0);
                let working_buys = pos.working_qty(Some(&intent.strategy_id), Some(Side::Buy));
                if alloc_qty <= 0 {
                    if working_buys > 0 {
                        return SideQty::RedirectToCancel;
                    }
                    return SideQty::Rejected("no allocation to exit".to_string());
                }
                let qty = intent.desired_qty.map(|q| q.min(alloc_qty)).unwrap_or(alloc_qty);
                let kind = if intent.kind == IntentKind::Flatten {
                    RiskRequestKind::Flatten
                } else {
                    RiskRequestKind::Exit
                };
                SideQty::Plan(Side::Sell, qty, kind)
            }
            IntentKind::SetTarget => {
                let current = pos.get_allocation(&intent.strategy_id).map(|a| a.qty).unwrap_or(0);
                let target = intent.target_qty.unwrap_or(current);
                let delta = target - current;
                if delta == 0 {
                    SideQty::AlreadyAtTarget
                } else if delta > 0 {
                    SideQty::Plan(Side::Buy, delta, RiskRequestKind::Entry)
                } else {
                    SideQty::Plan(Side::Sell, -delta, RiskRequestKind::Exit)
                }
            }
            IntentKind::CancelOrders | IntentKind::ModifyRisk => {
                SideQty::Rejected("handled before plan_and_execute".to_string())
            }
        }
    }

    async fn evaluate_entry_risk(
        &self,
        intent: &Intent,
        qty: i64,
        price_micros: i64,
        now: chrono::DateTime<Utc>,
    ) -> RiskVerdict {
        let account = self.store.account().await;
        let positions = self.store.get_all_positions().await;

        let existing_position_count = positions.iter().filter(|p| p.real_qty > 0 || p.has_working_orders()).count() as u32;
        let existing_gross_notional_micros: i64 = positions
            .iter()
            .map(|p| (p.real_qty + p.working_qty(None, Some(Side::Buy))) * p.avg_price_micros.max(1))
            .sum();
        let existing_symbol_notional_micros = positions
            .iter()
            .find(|p| p.symbol == intent.symbol)
            .map(|p| (p.real_qty + p.working_qty(None, Some(Side::Buy))) * p.avg_price_micros.max(1))
            .unwrap_or(0);
        let existing_strategy_position_count = positions
            .iter()
            .filter(|p| p.get_allocation(&intent.strategy_id).map_or(false, |a| a.qty > 0))
            .count() as u32;
        let existing_strategy_risk_micros: i64 = positions
            .iter()
            .filter_map(|p| p.get_allocation(&intent.strategy_id))
            .filter_map(|a| a.soft_stop_micros.map(|stop| a.qty * (a.cost_basis_micros - stop).abs()))
            .sum();

        let symbol_pos = self.store.get_position(&intent.symbol).await;
        let symbol_frozen = symbol_pos.frozen;
        let vi_cooldown_until = symbol_pos.vi_cooldown_until;
        let strategy_paused = self.paused_strategies.read().await.contains(&intent.strategy_id);
        let sectors = self.sectors.read().await;
        let mut state = self.risk_state.write().await;
        let sector = sectors.sector_of(&intent.symbol).cloned();

        let input = RiskCheckInput {
            request: RiskRequestKind::Entry,
            strategy_id: intent.strategy_id.clone(),
            symbol: intent.symbol.clone(),
            sector,
            qty,
            entry_price_micros: price_micros,
            stop_price_micros: intent.risk.hard_stop_micros.or(intent.risk.soft_stop_micros),
            equity_micros: account.equity_micros,
            daily_pnl_pct: account.daily_pnl_pct,
            current_regime: parse_regime(&account.current_regime),
            existing_gross_notional_micros,
            existing_net_notional_micros: existing_gross_notional_micros,
            existing_position_count,
            existing_symbol_notional_micros,
            existing_strategy_position_count,
            existing_strategy_risk_micros,
            now,
            vi_cooldown_until,
        };

        oms_risk::evaluate(&input, &self.risk_cfg, &mut state, &sectors, symbol_frozen, strategy_paused)
    }

    pub async fn update_sector_map(&self, symbol: impl Into<String>, sector: impl Into<String>) {
        self.sectors.write().await.update_sector_map(symbol, sector);
    }

    /// Exposes the sector-exposure tracker so the reconcile loop can keep
    /// its reserve/open counters in sync with fills and cancellations.
    pub fn sectors(&self) -> &RwLock<SectorExposure> {
        &self.sectors
    }

    pub async fn set_regime(&self, regime: &str) {
        self.store.update_account(|a| a.current_regime = regime.to_string()).await;
        self.sync_flags_to_persistence().await;
    }

    /// End-of-day reset: cancels every working order at the broker, clears
    /// the daily circuit-breaker latch and every symbol's frozen flag, and
    /// zeroes the day's realized P&L counter. Returns the number of orders
    /// cancelled.
    pub async fn eod_reset(&self) -> usize {
        let mut cancelled = 0usize;
        for order in self.store.get_working_orders(None).await {
            let result = self
                .broker
                .cancel_order(&order.broker_order_id, &order.symbol, order.branch.as_deref())
                .await;
            if result.success {
                self.store
                    .remove_working_order(&order.symbol, &order.broker_order_id)
                    .await;
                cancelled += 1;
            }
        }

        for pos in self.store.get_all_positions().await {
            if pos.frozen {
                self.store.update_position(&pos.symbol, |p| p.frozen = false).await;
            }
        }

        self.store
            .update_account(|a| {
                a.daily_realized_pnl_micros = 0;
                a.daily_total_pnl_micros = 0;
                a.daily_pnl_pct = 0.0;
            })
            .await;
        self.risk_state.write().await.halted = false;
        self.sync_flags_to_persistence().await;

        cancelled
    }
}

fn parse_regime(label: &str) -> Regime {
    match label {
        "CRISIS" => Regime::Crisis,
        "WEAK" => Regime::Weak,
        "STRONG" => Regime::Strong,
        _ => Regime::Normal,
    }
}

enum SideQty {
    Plan(Side, i64, RiskRequestKind),
    RedirectToCancel,
    AlreadyAtTarget,
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use oms_arbitration::default_lock_durations;
    use oms_broker::PaperBroker;
    use oms_schemas::{IntentConstraints, RiskPayload, TimeHorizon, Urgency};

    fn pipeline() -> OmsPipeline {
        let store = Arc::new(StateStore::new());
        let broker: Arc<dyn BrokerAdapter> = Arc::new(PaperBroker::new(100_000_000 * 1_000_000));
        let prices = Arc::new(crate::price::FixedPriceSource::new());
        prices.set("005930", 72_000 * 1_000_000);
        let pipeline = OmsPipeline::new(
            store.clone(),
            RiskConfig::sane_defaults(),
            ArbitrationEngine::new(default_lock_durations()),
            broker,
            prices,
        );
        pipeline
    }

    fn enter_req(strategy: &str, symbol: &str, qty: i64) -> IntentRequest {
        IntentRequest {
            strategy_id: strategy.to_string(),
            symbol: symbol.to_string(),
            kind: IntentKind::Enter,
            desired_qty: Some(qty),
            target_qty: None,
            urgency: Urgency::High,
            time_horizon: TimeHorizon::Intraday,
            constraints: IntentConstraints::default(),
            risk: RiskPayload {
                entry_price_micros: Some(72_000 * 1_000_000),
                soft_stop_micros: Some(71_000 * 1_000_000),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn happy_path_entry_submits_order_and_locks_symbol() {
        let pipeline = pipeline();
        pipeline.store.update_account(|a| a.equity_micros = 100_000_000 * 1_000_000).await;

        let result = pipeline.submit_intent(enter_req("KMP", "005930", 100)).await;
        assert_eq!(result.status, oms_schemas::IntentStatus::Executed);
        assert!(result.broker_order_id.is_some());

        let pos = pipeline.store.get_position("005930").await;
        assert_eq!(pos.entry_lock_owner.as_deref(), Some("KMP"));
    }

    #[tokio::test]
    async fn idempotent_resubmit_returns_cached_result() {
        let pipeline = pipeline();
        pipeline.store.update_account(|a| a.equity_micros = 100_000_000 * 1_000_000).await;

        let req = enter_req("KMP", "005930", 100);
        let first = pipeline.submit_intent(req.clone()).await;
        let second = pipeline.submit_intent(req.clone()).await;
        assert_eq!(first.broker_order_id, second.broker_order_id);
    }

    #[tokio::test]
    async fn second_strategy_deferred_by_entry_lock() {
        let pipeline = pipeline();
        pipeline.store.update_account(|a| a.equity_micros = 100_000_000 * 1_000_000).await;

        let _ = pipeline.submit_intent(enter_req("KMP", "005930", 100)).await;
        let second = pipeline.submit_intent(enter_req("KPR", "005930", 100)).await;
        assert_eq!(second.status, oms_schemas::IntentStatus::Deferred);
    }
}
