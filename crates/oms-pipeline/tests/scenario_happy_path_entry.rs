use std::sync::Arc;

use oms_arbitration::{default_lock_durations, ArbitrationEngine};
use oms_broker::{BrokerAdapter, PaperBroker};
use oms_pipeline::{FixedPriceSource, OmsPipeline};
use oms_risk::RiskConfig;
use oms_schemas::{
    IntentConstraints, IntentKind, IntentRequest, IntentStatus, RiskPayload, TimeHorizon, Urgency,
};
use oms_state::{OrderType, StateStore};

fn pipeline(starting_equity_micros: i64) -> OmsPipeline {
    let store = Arc::new(StateStore::new());
    let broker: Arc<dyn BrokerAdapter> = Arc::new(PaperBroker::new(starting_equity_micros));
    let prices = Arc::new(FixedPriceSource::new());
    prices.set("005930", 72_000 * 1_000_000);
    OmsPipeline::new(
        store,
        RiskConfig::sane_defaults(),
        ArbitrationEngine::new(default_lock_durations()),
        broker,
        prices,
    )
}

#[tokio::test]
async fn happy_path_entry_opens_marketable_limit_and_locks_symbol() {
    let pipeline = pipeline(100_000_000 * 1_000_000);
    pipeline
        .store
        .update_account(|a| a.equity_micros = 100_000_000 * 1_000_000)
        .await;

    let req = IntentRequest {
        strategy_id: "KMP".to_string(),
        symbol: "005930".to_string(),
        kind: IntentKind::Enter,
        desired_qty: Some(100),
        target_qty: None,
        urgency: Urgency::High,
        time_horizon: TimeHorizon::Intraday,
        constraints: IntentConstraints::default(),
        risk: RiskPayload {
            entry_price_micros: Some(72_000 * 1_000_000),
            soft_stop_micros: Some(71_000 * 1_000_000),
            ..Default::default()
        },
    };

    let result = pipeline.submit_intent(req).await;
    assert_eq!(result.status, IntentStatus::Executed);
    assert!(result.broker_order_id.is_some());
    assert!(result.modified_qty.is_none());

    let orders = pipeline.store.get_working_orders(Some("005930")).await;
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.order_type, OrderType::MarketableLimit);
    assert_eq!(order.qty, 100);
    assert_eq!(order.cancel_after_secs, Some(10));
    // marketable limit = current price + 0.2%, i.e. 72_000 * 1.002 = 72_144
    assert_eq!(order.limit_price_micros, Some(72_144 * 1_000_000));

    let pos = pipeline.store.get_position("005930").await;
    assert_eq!(pos.entry_lock_owner.as_deref(), Some("KMP"));
    // no allocation yet: the fill hasn't been reconciled.
    assert!(pos.get_allocation("KMP").is_none());
}
