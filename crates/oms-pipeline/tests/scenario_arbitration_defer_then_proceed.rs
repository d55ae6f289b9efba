use std::sync::Arc;

use chrono::Duration;
use oms_arbitration::{default_lock_durations, ArbitrationEngine};
use oms_broker::{BrokerAdapter, PaperBroker};
use oms_pipeline::{FixedPriceSource, OmsPipeline};
use oms_risk::RiskConfig;
use oms_schemas::{IntentConstraints, IntentKind, IntentRequest, IntentStatus, RiskPayload, TimeHorizon, Urgency};
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

fn enter_req(strategy: &str) -> IntentRequest {
    IntentRequest {
        strategy_id: strategy.to_string(),
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
    }
}

/// Strategy A locks the symbol on entry; strategy B's contesting entry is
/// deferred with a `defer_until` near A's lock expiry. Once A's lock is
/// released, B's next attempt proceeds.
#[tokio::test]
async fn second_strategy_defers_then_proceeds_after_release() {
    let pipeline = pipeline();
    pipeline
        .store
        .update_account(|a| a.equity_micros = 100_000_000 * 1_000_000)
        .await;

    let a = pipeline.submit_intent(enter_req("KMP")).await;
    assert_eq!(a.status, IntentStatus::Executed);

    let b_first = pipeline.submit_intent(enter_req("KPR")).await;
    assert_eq!(b_first.status, IntentStatus::Deferred);
    let pos = pipeline.store.get_position("005930").await;
    assert_eq!(pos.entry_lock_owner.as_deref(), Some("KMP"));
    if let Some(defer_until) = b_first.defer_until {
        assert!(defer_until > chrono::Utc::now());
        assert!(defer_until <= chrono::Utc::now() + Duration::seconds(91));
    }

    pipeline.store.release_entry_lock("005930", "KMP").await;

    let b_second = pipeline.submit_intent(enter_req("KPR")).await;
    assert_eq!(b_second.status, IntentStatus::Executed);
    let pos = pipeline.store.get_position("005930").await;
    assert_eq!(pos.entry_lock_owner.as_deref(), Some("KPR"));
}
