use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, warn};

use oms_broker::BrokerAdapter;
use oms_db::OmsPersistence;
use oms_risk::SectorExposure;
use oms_schemas::Side;
use oms_state::{OrderStatus, StateStore};

use crate::types::{CycleReport, DriftEvent, DriftKind};

pub struct ReconcileEngine<'a> {
    store: &'a StateStore,
    broker: &'a dyn BrokerAdapter,
    sectors: Option<&'a RwLock<SectorExposure>>,
    persistence: Option<&'a OmsPersistence>,
}

impl<'a> ReconcileEngine<'a> {
    pub fn new(store: &'a StateStore, broker: &'a dyn BrokerAdapter) -> Self {
        ReconcileEngine { store, broker, sectors: None, persistence: None }
    }

    /// Same as [`Self::new`] but also reconciles sector-exposure reservations
    /// as orders fill, get cancelled, or are closed out.
    pub fn with_sectors(store: &'a StateStore, broker: &'a dyn BrokerAdapter, sectors: &'a RwLock<SectorExposure>) -> Self {
        ReconcileEngine { store, broker, sectors: Some(sectors), persistence: None }
    }

    /// Attaches a database write-through log; no-op when `persistence` is
    /// `None`, so callers without a configured database keep running
    /// in-memory-only.
    pub fn with_persistence(mut self, persistence: Option<&'a OmsPersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    /// Runs one reconciliation cycle: sync working orders, enforce
    /// timeouts, refresh positions/equity, then check drift. Returns a
    /// report the caller uses to drive the adaptive interval and safe-mode
    /// decisions.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let broker_orders = self.broker.get_orders().await;
        if !broker_orders.ok {
            warn!(error = ?broker_orders.error_message, "reconcile: get_orders failed, skipping cycle");
            report.cycle_failed = true;
            return report;
        }
        let by_id: HashMap<String, _> = broker_orders
            .data
            .into_iter()
            .map(|o| (o.broker_order_id.clone(), o))
            .collect();

        self.sync_working_orders(&by_id, &mut report).await;
        self.enforce_timeouts(&by_id, &mut report).await;

        let snapshot = self.broker.get_balance_snapshot().await;
        if snapshot.ok {
            self.store
                .update_account(|a| a.equity_micros = snapshot.data.equity_micros)
                .await;
            for pos in &snapshot.data.positions {
                self.store
                    .update_position(&pos.symbol, |p| {
                        p.real_qty = pos.qty;
                        p.avg_price_micros = pos.avg_price_micros;
                    })
                    .await;
                report.positions_updated += 1;
                if let Some(db) = self.persistence {
                    db.sync_position(&self.store.get_position(&pos.symbol).await).await;
                }
            }
        } else {
            warn!(error = ?snapshot.error_message, "reconcile: get_balance_snapshot failed");
        }

        self.check_drift(&mut report).await;

        if let Some(db) = self.persistence {
            let drift_json = serde_json::to_value(&report.drift_events).unwrap_or(serde_json::Value::Null);
            db.log_recon(
                started.elapsed().as_millis() as i64,
                report.orders_synced as i32,
                report.orders_filled as i32,
                drift_json,
            )
            .await;
        }

        report
    }

    async fn sync_working_orders(
        &self,
        by_id: &HashMap<String, oms_broker::BrokerOrder>,
        report: &mut CycleReport,
    ) {
        let working = self.store.get_working_orders(None).await;
        for local in working {
            report.orders_synced += 1;
            match by_id.get(&local.broker_order_id) {
                Some(remote) => {
                    let fill_delta = remote.filled_qty - local.filled_qty;
                    if fill_delta > 0 {
                        self.apply_fill(&local, fill_delta, remote.avg_fill_price_micros, report)
                            .await;
                    }
                    let new_status = if remote.filled_qty >= local.qty {
                        OrderStatus::Filled
                    } else if remote.filled_qty > 0 {
                        OrderStatus::Partial
                    } else {
                        OrderStatus::Working
                    };
                    self.store
                        .update_position(&local.symbol, |p| {
                            if let Some(o) = p
                                .working_orders
                                .iter_mut()
                                .find(|o| o.broker_order_id == local.broker_order_id)
                            {
                                o.filled_qty = remote.filled_qty;
                                o.status = new_status;
                                if o.branch.is_none() {
                                    o.branch = remote.branch.clone();
                                }
                            }
                        })
                        .await;
                    if new_status == OrderStatus::Filled {
                        report.orders_filled += 1;
                        let fill_notional = remote.avg_fill_price_micros.unwrap_or(0) * remote.filled_qty;
                        self.resolve_sector_on_terminal(&local, true, fill_notional).await;
                        self.store
                            .remove_working_order(&local.symbol, &local.broker_order_id)
                            .await;
                        self.store
                            .release_entry_lock(&local.symbol, &local.strategy_id)
                            .await;
                    }
                }
                None => {
                    // Broker no longer reports the order: terminal. Classify
                    // FILLED vs CANCELLED from the last known fill progress.
                    report.orders_terminal += 1;
                    let filled = local.filled_qty >= local.qty;
                    if filled {
                        report.orders_filled += 1;
                    } else {
                        report.orders_cancelled += 1;
                    }
                    let fill_notional = local.limit_price_micros.unwrap_or(0) * local.filled_qty;
                    self.resolve_sector_on_terminal(&local, filled, fill_notional).await;
                    self.store
                        .remove_working_order(&local.symbol, &local.broker_order_id)
                        .await;
                    self.store
                        .release_entry_lock(&local.symbol, &local.strategy_id)
                        .await;
                }
            }
        }
    }

    async fn enforce_timeouts(
        &self,
        by_id: &HashMap<String, oms_broker::BrokerOrder>,
        report: &mut CycleReport,
    ) {
        let now = Utc::now();
        let working = self.store.get_working_orders(None).await;
        for local in working {
            if !local.is_timed_out(now) {
                continue;
            }
            if let Some(remote) = by_id.get(&local.broker_order_id) {
                let fill_delta = remote.filled_qty - local.filled_qty;
                if fill_delta > 0 {
                    self.apply_fill(&local, fill_delta, remote.avg_fill_price_micros, report)
                        .await;
                }
            }
            let result = self
                .broker
                .cancel_order(&local.broker_order_id, &local.symbol, local.branch.as_deref())
                .await;
            if result.success {
                report.orders_timed_out += 1;
                info!(order_id = %local.broker_order_id, "reconcile: cancelled timed-out order");
            }
        }
    }

    /// Resolves a terminal working order's sector-exposure reservation: a
    /// filled buy moves its reserved notional into open exposure, a
    /// cancelled buy releases the reservation outright, and a filled sell
    /// (exit) shrinks open exposure by the closed notional. No-op when this
    /// engine wasn't constructed with sector tracking.
    async fn resolve_sector_on_terminal(&self, order: &oms_state::WorkingOrder, filled: bool, fill_notional_micros: i64) {
        let Some(sectors) = self.sectors else { return };
        let sector = match &order.sector {
            Some(s) => Some(s.clone()),
            None => sectors.read().await.sector_of(&order.symbol).cloned(),
        };
        let Some(sector) = sector else { return };
        let mut sx = sectors.write().await;
        match order.side {
            Side::Buy => {
                if filled {
                    sx.on_sector_fill(&sector, fill_notional_micros, order.reserved_notional_micros);
                } else {
                    sx.unreserve_sector(&sector, order.reserved_notional_micros);
                }
            }
            Side::Sell => {
                if filled {
                    sx.on_sector_close(&sector, fill_notional_micros);
                }
            }
        }
    }

    async fn apply_fill(
        &self,
        order: &oms_state::WorkingOrder,
        fill_delta: i64,
        fill_price_micros: Option<i64>,
        report: &mut CycleReport,
    ) {
        let qty_delta = match order.side {
            Side::Buy => fill_delta,
            Side::Sell => -fill_delta,
        };

        if order.side == Side::Sell {
            if let Some(price) = fill_price_micros {
                let pos = self.store.get_position(&order.symbol).await;
                if let Some(alloc) = pos.get_allocation(&order.strategy_id) {
                    let realized = (price - alloc.cost_basis_micros) * fill_delta;
                    self.store.record_realized_pnl(realized).await;
                }
            }
        }

        self.store
            .update_allocation(
                &order.symbol,
                &order.strategy_id,
                qty_delta,
                fill_price_micros,
                Utc::now(),
            )
            .await;

        if let Some(db) = self.persistence {
            let fill_id = uuid::Uuid::new_v4().to_string();
            db.record_fill(&fill_id, order, fill_delta, fill_price_micros.unwrap_or(0), Utc::now())
                .await;
        }

        let _ = report;
    }

    async fn check_drift(&self, report: &mut CycleReport) {
        let positions = self.store.get_all_positions().await;
        for pos in positions {
            if pos.has_working_orders() {
                continue;
            }
            let drift = pos.allocation_drift();
            if drift == 0 {
                if pos.frozen && pos.get_allocation(oms_state::UNKNOWN_STRATEGY).map_or(true, |a| a.qty == 0) {
                    self.store.update_position(&pos.symbol, |p| p.frozen = false).await;
                }
                continue;
            }

            let now = Utc::now();
            if drift > 0 {
                self.store
                    .update_allocation(&pos.symbol, oms_state::UNKNOWN_STRATEGY, drift, None, now)
                    .await;
                self.store.update_position(&pos.symbol, |p| p.frozen = true).await;
                report.merge_drift(DriftEvent {
                    symbol: pos.symbol.clone(),
                    kind: DriftKind::Positive,
                    qty: drift,
                    detected_at: now,
                });
            } else {
                self.store.update_position(&pos.symbol, |p| p.frozen = true).await;
                warn!(symbol = %pos.symbol, drift, "reconcile: negative drift detected, logging only");
                report.merge_drift(DriftEvent {
                    symbol: pos.symbol.clone(),
                    kind: DriftKind::Negative,
                    qty: drift,
                    detected_at: now,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oms_broker::PaperBroker;
    use oms_schemas::Side;
    use oms_state::{OrderType, WorkingOrder};

    #[tokio::test]
    async fn positive_drift_creates_unknown_allocation_and_freezes() {
        let store = StateStore::new();
        let broker = PaperBroker::new(100_000_000);
        store.update_position("005930", |p| p.real_qty = 150).await;
        store
            .update_allocation("005930", "KMP", 100, Some(70_000_000_000), Utc::now())
            .await;

        let engine = ReconcileEngine::new(&store, &broker);
        engine.check_drift(&mut CycleReport::default()).await;

        let pos = store.get_position("005930").await;
        assert!(pos.frozen);
        assert_eq!(pos.get_allocation(oms_state::UNKNOWN_STRATEGY).unwrap().qty, 50);
    }

    #[tokio::test]
    async fn fill_sync_updates_allocation_and_clears_working_order() {
        let store = StateStore::new();
        let broker = PaperBroker::new(100_000_000);

        let submit = broker
            .submit_order(oms_broker::SubmitOrderRequest {
                symbol: "005930",
                side: Side::Buy,
                qty: 100,
                order_type: OrderType::Market,
                limit_price_micros: None,
                stop_price_micros: None,
            })
            .await;
        let order_id = submit.order_id.unwrap();

        store
            .add_working_order(
                "005930",
                WorkingOrder {
                    broker_order_id: order_id.clone(),
                    symbol: "005930".to_string(),
                    strategy_id: "KMP".to_string(),
                    side: Side::Buy,
                    qty: 100,
                    filled_qty: 0,
                    limit_price_micros: None,
                    order_type: OrderType::Market,
                    status: OrderStatus::Working,
                    submitted_at: Utc::now(),
                    cancel_after_secs: None,
                    branch: None,
                    sector: None,
                    reserved_notional_micros: 0,
                },
            )
            .await;

        broker.apply_fill(&order_id, 100, 70_000_000_000);

        let engine = ReconcileEngine::new(&store, &broker);
        let report = engine.run_cycle().await;
        assert_eq!(report.orders_filled, 1);

        let pos = store.get_position("005930").await;
        assert!(pos.working_orders.is_empty());
        assert_eq!(pos.get_allocation("KMP").unwrap().qty, 100);
    }
}
