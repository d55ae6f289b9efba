use chrono::Utc;

use oms_broker::PaperBroker;
use oms_reconcile::ReconcileEngine;
use oms_state::{StateStore, UNKNOWN_STRATEGY};

/// `real_qty = 150` against allocations summing to `100` with no working
/// orders must freeze the symbol and grow a synthetic `_UNKNOWN_`
/// allocation absorbing the positive drift. Once the drift is resolved
/// (the unknown allocation is cleared) the symbol unfreezes on the next
/// cycle.
#[tokio::test]
async fn positive_drift_freezes_symbol_and_absorbs_into_unknown_allocation() {
    let store = StateStore::new();
    let broker = PaperBroker::new(100_000_000 * 1_000_000);

    store.update_position("005930", |p| p.real_qty = 150).await;
    store
        .update_allocation("005930", "KMP", 100, Some(70_000 * 1_000_000), Utc::now())
        .await;

    let engine = ReconcileEngine::new(&store, &broker);
    let report = engine.run_cycle().await;
    assert_eq!(report.drift_events.len(), 1);

    let pos = store.get_position("005930").await;
    assert!(pos.frozen);
    assert_eq!(pos.get_allocation(UNKNOWN_STRATEGY).unwrap().qty, 50);
    assert_eq!(pos.allocation_drift(), 0);

    // Resolve the drift by assigning the unknown quantity to a real strategy.
    store
        .update_allocation("005930", UNKNOWN_STRATEGY, -50, None, Utc::now())
        .await;
    store
        .update_allocation("005930", "KMP", 50, None, Utc::now())
        .await;

    let report = engine.run_cycle().await;
    assert!(report.drift_events.is_empty());
    let pos = store.get_position("005930").await;
    assert!(!pos.frozen);
    assert_eq!(pos.get_allocation("KMP").unwrap().qty, 150);
}
