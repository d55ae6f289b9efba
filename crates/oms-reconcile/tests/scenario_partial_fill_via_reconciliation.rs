use chrono::Utc;

use oms_broker::{BrokerAdapter, PaperBroker, SubmitOrderRequest};
use oms_reconcile::ReconcileEngine;
use oms_schemas::Side;
use oms_state::{OrderStatus, OrderType, StateStore, WorkingOrder};

/// A broker reporting a partial fill on the next sync must update the
/// strategy's allocation to the filled quantity at the reported price,
/// leave the working order WORKING with the new `filled_qty`, and keep
/// the entry lock held (the order is not yet terminal).
#[tokio::test]
async fn partial_fill_updates_allocation_and_keeps_order_working() {
    let store = StateStore::new();
    let broker = PaperBroker::new(100_000_000 * 1_000_000);

    let submit = broker
        .submit_order(SubmitOrderRequest {
            symbol: "005930",
            side: Side::Buy,
            qty: 100,
            order_type: OrderType::MarketableLimit,
            limit_price_micros: Some(72_144 * 1_000_000),
            stop_price_micros: None,
        })
        .await;
    let order_id = submit.order_id.unwrap();

    let now = Utc::now();
    store
        .set_entry_lock("005930", "KMP", now + chrono::Duration::seconds(90), now)
        .await;
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
                limit_price_micros: Some(72_144 * 1_000_000),
                order_type: OrderType::MarketableLimit,
                status: OrderStatus::Working,
                submitted_at: now,
                cancel_after_secs: Some(10),
                branch: None,
                sector: None,
                reserved_notional_micros: 0,
            },
        )
        .await;

    broker.apply_fill(&order_id, 50, 72_000 * 1_000_000);

    let engine = ReconcileEngine::new(&store, &broker);
    let report = engine.run_cycle().await;
    assert_eq!(report.orders_filled, 0);
    assert_eq!(report.orders_synced, 1);

    let pos = store.get_position("005930").await;
    let order = pos
        .working_orders
        .iter()
        .find(|o| o.broker_order_id == order_id)
        .expect("order still working");
    assert_eq!(order.status, OrderStatus::Partial);
    assert_eq!(order.filled_qty, 50);

    let alloc = pos.get_allocation("KMP").expect("allocation created on fill");
    assert_eq!(alloc.qty, 50);
    assert_eq!(alloc.cost_basis_micros, 72_000 * 1_000_000);
    assert_eq!(pos.entry_lock_owner.as_deref(), Some("KMP"));
}
