use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::adapter::BrokerAdapter;
use crate::types::{
    AdapterResult, BalanceSnapshot, BrokerOrder, BrokerPosition, BrokerQueryResult, SubmitOrderRequest,
};

/// Deterministic in-memory paper broker: accepts every order immediately,
/// never rejects, never fills on its own. Fills are injected by test code
/// via [`PaperBroker::apply_fill`] to drive the reconciliation loop.
/// Mirrors the teacher's paper-broker crate's "no randomness, no
/// timestamps" design.
#[derive(Default)]
pub struct PaperBroker {
    inner: Mutex<PaperBrokerInner>,
}

#[derive(Default)]
struct PaperBrokerInner {
    orders: BTreeMap<String, BrokerOrder>,
    positions: BTreeMap<String, BrokerPosition>,
    equity_micros: i64,
    next_id: u64,
}

impl PaperBroker {
    pub fn new(starting_equity_micros: i64) -> Self {
        PaperBroker {
            inner: Mutex::new(PaperBrokerInner {
                orders: BTreeMap::new(),
                positions: BTreeMap::new(),
                equity_micros: starting_equity_micros,
                next_id: 1,
            }),
        }
    }

    pub fn apply_fill(&self, broker_order_id: &str, fill_qty: i64, fill_price_micros: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(order) = inner.orders.get_mut(broker_order_id) {
            order.filled_qty = (order.filled_qty + fill_qty).min(order.qty);
            order.avg_fill_price_micros = Some(fill_price_micros);
            let symbol = order.symbol.clone();
            let side = order.side;
            let pos = inner
                .positions
                .entry(symbol.clone())
                .or_insert(BrokerPosition {
                    symbol,
                    qty: 0,
                    avg_price_micros: fill_price_micros,
                });
            let signed = match side {
                oms_schemas::Side::Buy => fill_qty,
                oms_schemas::Side::Sell => -fill_qty,
            };
            pos.qty += signed;
        }
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    async fn submit_order(&self, req: SubmitOrderRequest<'_>) -> AdapterResult {
        let mut inner = self.inner.lock().unwrap();
        let id = format!("PAPER-{}", inner.next_id);
        inner.next_id += 1;
        inner.orders.insert(
            id.clone(),
            BrokerOrder {
                broker_order_id: id.clone(),
                symbol: req.symbol.to_string(),
                side: req.side,
                qty: req.qty,
                filled_qty: 0,
                avg_fill_price_micros: None,
                branch: Some("PAPER".to_string()),
            },
        );
        AdapterResult::ok(id)
    }

    async fn cancel_order(&self, broker_order_id: &str, _symbol: &str, _branch: Option<&str>) -> AdapterResult {
        let mut inner = self.inner.lock().unwrap();
        if inner.orders.remove(broker_order_id).is_some() {
            AdapterResult::ok(broker_order_id.to_string())
        } else {
            AdapterResult::fail(crate::types::AdapterError::RejectedInvalid, "unknown order")
        }
    }

    async fn get_orders(&self) -> BrokerQueryResult<Vec<BrokerOrder>> {
        let inner = self.inner.lock().unwrap();
        BrokerQueryResult::ok(inner.orders.values().cloned().collect())
    }

    async fn get_balance_snapshot(&self) -> BrokerQueryResult<BalanceSnapshot> {
        let inner = self.inner.lock().unwrap();
        BrokerQueryResult::ok(BalanceSnapshot {
            positions: inner.positions.values().cloned().collect(),
            equity_micros: inner.equity_micros,
            captured_at: Utc::now(),
        })
    }

    async fn get_buyable_cash(&self) -> BrokerQueryResult<i64> {
        let inner = self.inner.lock().unwrap();
        BrokerQueryResult::ok(inner.equity_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oms_schemas::Side;
    use oms_state::OrderType;

    #[tokio::test]
    async fn submit_then_fill_updates_position() {
        let broker = PaperBroker::new(100_000_000);
        let req = SubmitOrderRequest {
            symbol: "005930",
            side: Side::Buy,
            qty: 100,
            order_type: OrderType::Market,
            limit_price_micros: None,
            stop_price_micros: None,
        };
        let result = broker.submit_order(req).await;
        assert!(result.success);
        let id = result.order_id.unwrap();
        broker.apply_fill(&id, 100, 70_000_000_000);

        let snap = broker.get_balance_snapshot().await;
        assert!(snap.ok);
        assert_eq!(snap.data.positions[0].qty, 100);
    }
}
