//! Resolves conflicts between strategies acting on the same symbol:
//! per-symbol entry locks with strategy-specific durations, and a pending
//! queue so an in-flight exit always wins over a contesting entry.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::Mutex;

use oms_schemas::IntentKind;
use oms_state::StateStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArbitrationResult {
    Proceed,
    Defer,
    Cancel,
}

impl fmt::Display for ArbitrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArbitrationResult::Proceed => write!(f, "proceed"),
            ArbitrationResult::Defer => write!(f, "defer"),
            ArbitrationResult::Cancel => write!(f, "cancel"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArbitrationDecision {
    pub result: ArbitrationResult,
    pub reason: String,
    pub defer_until: Option<DateTime<Utc>>,
}

impl ArbitrationDecision {
    fn proceed(reason: impl Into<String>) -> Self {
        ArbitrationDecision {
            result: ArbitrationResult::Proceed,
            reason: reason.into(),
            defer_until: None,
        }
    }
    fn defer(reason: impl Into<String>, defer_until: Option<DateTime<Utc>>) -> Self {
        ArbitrationDecision {
            result: ArbitrationResult::Defer,
            reason: reason.into(),
            defer_until,
        }
    }
    fn cancel(reason: impl Into<String>) -> Self {
        ArbitrationDecision {
            result: ArbitrationResult::Cancel,
            reason: reason.into(),
            defer_until: None,
        }
    }
}

/// Lock duration per strategy, seconds. Mirrors
/// `original_source/oms/arbitration.py`'s `LOCK_DURATIONS` constant.
pub fn default_lock_durations() -> BTreeMap<String, i64> {
    let mut m = BTreeMap::new();
    m.insert("KMP".to_string(), 90);
    m.insert("KPR".to_string(), 180);
    m.insert("PCIM".to_string(), 300);
    m.insert("NULRIMOK".to_string(), 60);
    m
}

const DEFAULT_LOCK_SECS: i64 = 60;

pub struct ArbitrationEngine {
    lock_durations: BTreeMap<String, i64>,
    pending: Mutex<BTreeMap<String, Vec<IntentKind>>>,
}

impl ArbitrationEngine {
    pub fn new(lock_durations: BTreeMap<String, i64>) -> Self {
        ArbitrationEngine {
            lock_durations,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock_duration(&self, strategy_id: &str) -> i64 {
        self.lock_durations
            .get(strategy_id)
            .copied()
            .unwrap_or(DEFAULT_LOCK_SECS)
    }

    pub async fn add_pending(&self, symbol: &str, kind: IntentKind) {
        self.pending
            .lock()
            .await
            .entry(symbol.to_string())
            .or_default()
            .push(kind);
    }

    pub async fn remove_pending(&self, symbol: &str, kind: IntentKind) {
        let mut pending = self.pending.lock().await;
        if let Some(list) = pending.get_mut(symbol) {
            if let Some(idx) = list.iter().position(|k| *k == kind) {
                list.remove(idx);
            }
            if list.is_empty() {
                pending.remove(symbol);
            }
        }
    }

    async fn has_pending_exit(&self, symbol: &str) -> bool {
        self.pending
            .lock()
            .await
            .get(symbol)
            .map(|list| {
                list.iter()
                    .any(|k| matches!(k, IntentKind::Exit | IntentKind::Flatten))
            })
            .unwrap_or(false)
    }

    pub async fn arbitrate(
        &self,
        store: &StateStore,
        kind: IntentKind,
        strategy_id: &str,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> ArbitrationDecision {
        match kind {
            IntentKind::Exit | IntentKind::Flatten | IntentKind::Reduce => {
                ArbitrationDecision::proceed("exit-priority intents always proceed")
            }
            IntentKind::Enter => self.arbitrate_entry(store, strategy_id, symbol, now).await,
            IntentKind::SetTarget | IntentKind::CancelOrders | IntentKind::ModifyRisk => {
                ArbitrationDecision::proceed("operational intent bypasses arbitration")
            }
        }
    }

    async fn arbitrate_entry(
        &self,
        store: &StateStore,
        strategy_id: &str,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> ArbitrationDecision {
        let pos = store.get_position(symbol).await;

        if pos.get_allocation(strategy_id).map_or(false, |a| a.qty > 0) {
            return ArbitrationDecision::cancel("strategy already holds an allocation");
        }

        if pos.is_entry_locked(now) && pos.entry_lock_owner.as_deref() != Some(strategy_id) {
            return ArbitrationDecision::defer("symbol entry-locked by another strategy", pos.entry_lock_until);
        }

        let until = now + Duration::seconds(self.lock_duration(strategy_id));
        if !store.set_entry_lock(symbol, strategy_id, until, now).await {
            return ArbitrationDecision::defer("failed to acquire entry lock", None);
        }

        if self.has_pending_exit(symbol).await {
            store.release_entry_lock(symbol, strategy_id).await;
            return ArbitrationDecision::defer("exit pending for symbol takes priority", None);
        }

        ArbitrationDecision::proceed("entry lock acquired")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_strategy_defers_while_lock_is_held() {
        let store = StateStore::new();
        let engine = ArbitrationEngine::new(default_lock_durations());
        let now = Utc::now();

        let first = engine
            .arbitrate(&store, IntentKind::Enter, "KMP", "005930", now)
            .await;
        assert_eq!(first.result, ArbitrationResult::Proceed);

        let second = engine
            .arbitrate(&store, IntentKind::Enter, "KPR", "005930", now)
            .await;
        assert_eq!(second.result, ArbitrationResult::Defer);
    }

    #[tokio::test]
    async fn pending_exit_defers_contesting_entry() {
        let store = StateStore::new();
        let engine = ArbitrationEngine::new(default_lock_durations());
        let now = Utc::now();

        engine.add_pending("005930", IntentKind::Exit).await;
        let decision = engine
            .arbitrate(&store, IntentKind::Enter, "KMP", "005930", now)
            .await;
        assert_eq!(decision.result, ArbitrationResult::Defer);

        // lock must have been released so a later attempt is not stuck
        let pos = store.get_position("005930").await;
        assert!(pos.entry_lock_owner.is_none());
    }

    #[tokio::test]
    async fn exit_always_proceeds() {
        let store = StateStore::new();
        let engine = ArbitrationEngine::new(default_lock_durations());
        let decision = engine
            .arbitrate(&store, IntentKind::Exit, "KMP", "005930", Utc::now())
            .await;
        assert_eq!(decision.result, ArbitrationResult::Proceed);
    }
}
