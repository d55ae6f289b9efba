use std::time::Duration;

use oms_schemas::Side;
use tracing::warn;

use crate::adapter::BrokerAdapter;
use crate::types::{AdapterError, AdapterResult, SubmitOrderRequest};

const DEFAULT_MAX_RETRIES: u32 = 3;

/// Submits an order with retry-on-transient-error and client-side dedup:
/// before each retry, queries the broker's open orders and, if one already
/// matches `(symbol, side, qty)`, treats the retry as redundant and returns
/// that order's id rather than risking a duplicate submission. The broker
/// is never assumed to deduplicate on its own.
pub async fn submit_with_retry(
    broker: &dyn BrokerAdapter,
    req: SubmitOrderRequest<'_>,
    max_retries: Option<u32>,
) -> AdapterResult {
    let max_retries = max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
    let mut attempt = 0;

    loop {
        let result = broker.submit_order(req).await;
        if result.success {
            return result;
        }
        if !result.error.is_transient() || attempt >= max_retries {
            return result;
        }

        if let Some(dup) = find_duplicate(broker, req.symbol, req.side, req.qty).await {
            warn!(symbol = req.symbol, %dup, "submit retry found a pre-existing matching order, treating as success");
            return AdapterResult::ok(dup);
        }

        let backoff = Duration::from_secs(2u64.saturating_pow(attempt));
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}

async fn find_duplicate(broker: &dyn BrokerAdapter, symbol: &str, side: Side, qty: i64) -> Option<String> {
    let open = broker.get_orders().await;
    if !open.ok {
        return None;
    }
    open.data
        .into_iter()
        .find(|o| o.symbol == symbol && o.side == side && o.qty == qty)
        .map(|o| o.broker_order_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
    pub attempts: u32,
    pub error: AdapterError,
}
