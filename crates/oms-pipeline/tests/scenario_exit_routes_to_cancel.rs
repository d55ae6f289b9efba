use std::sync::Arc;

use oms_arbitration::{default_lock_durations, ArbitrationEngine};
use oms_broker::{BrokerAdapter, PaperBroker};
use oms_pipeline::{FixedPriceSource, OmsPipeline};
use oms_risk::RiskConfig;
use oms_schemas::{
    IntentConstraints, IntentKind, IntentRequest, IntentStatus, RiskPayload, TimeHorizon, Urgency,
};
use oms_state::StateStore;

fn pipeline() -> OmsPipeline {
    let store = Arc::new(StateStore::new());
    let broker: Arc<dyn BrokerAdapter> = Arc::new(PaperBroker::new(100_000_000 * 1_000_000));
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

fn req(strategy: &str, symbol: &str, kind: IntentKind, qty: Option<i64>) -> IntentRequest {
    IntentRequest {
        strategy_id: strategy.to_string(),
        symbol: symbol.to_string(),
        kind,
        desired_qty: qty,
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

/// A strategy with a still-working BUY order but no filled allocation yet
/// that submits EXIT must have the pipeline redirect it to cancel the
/// working order rather than reject it for lacking an allocation.
#[tokio::test]
async fn exit_without_allocation_cancels_working_buy() {
    let pipeline = pipeline();
    pipeline
        .store
        .update_account(|a| a.equity_micros = 100_000_000 * 1_000_000)
        .await;

    let entry = pipeline
        .submit_intent(req("KMP", "005930", IntentKind::Enter, Some(100)))
        .await;
    assert_eq!(entry.status, IntentStatus::Executed);
    assert_eq!(pipeline.store.get_working_orders(Some("005930")).await.len(), 1);

    let exit = pipeline
        .submit_intent(req("KMP", "005930", IntentKind::Exit, None))
        .await;
    assert_eq!(exit.status, IntentStatus::Executed);
    assert_eq!(exit.message.as_deref(), Some("Cancelled 1 order(s)"));
    assert!(pipeline.store.get_working_orders(Some("005930")).await.is_empty());
}
