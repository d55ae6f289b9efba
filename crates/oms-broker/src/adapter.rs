use async_trait::async_trait;

use crate::types::{AdapterResult, BalanceSnapshot, BrokerOrder, BrokerQueryResult, SubmitOrderRequest};

/// Abstraction over a concrete broker client. Implementors do their own
/// blocking-SDK-to-async bridging (`tokio::task::spawn_blocking`) if the
/// underlying client is synchronous; callers only see `async fn`s.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn submit_order(&self, req: SubmitOrderRequest<'_>) -> AdapterResult;
    async fn cancel_order(&self, broker_order_id: &str, symbol: &str, branch: Option<&str>) -> AdapterResult;
    async fn get_orders(&self) -> BrokerQueryResult<Vec<BrokerOrder>>;
    async fn get_balance_snapshot(&self) -> BrokerQueryResult<BalanceSnapshot>;
    async fn get_buyable_cash(&self) -> BrokerQueryResult<i64>;
}
