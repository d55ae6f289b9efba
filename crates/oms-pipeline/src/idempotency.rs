use std::collections::HashMap;
use tokio::sync::Mutex;

use oms_schemas::IntentResult;

/// Maps a deterministic `idempotency_key` to the result that was produced
/// for it. Only `EXECUTED` results are cached (see
/// [`oms_schemas::IntentResult::is_cacheable`]) so rejected/deferred
/// intents remain legitimately retryable. Object-safety is not required
/// today — the in-process map is the only implementation — but the type is
/// kept narrow enough that a persisted store could replace it without
/// touching callers.
#[derive(Default)]
pub struct IdempotencyStore {
    cache: Mutex<HashMap<String, IntentResult>>,
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<IntentResult> {
        self.cache.lock().await.get(key).cloned()
    }

    pub async fn put_if_cacheable(&self, result: &IntentResult) {
        if result.is_cacheable() {
            self.cache
                .lock()
                .await
                .insert(result.idempotency_key.clone(), result.clone());
        }
    }
}
