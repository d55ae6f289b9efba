use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Lazily-created per-symbol mutex registry. At most one intent per symbol
/// is processed at a time; intents on different symbols proceed fully in
/// parallel. Mirrors the lazy-lock pattern the teacher's execution crate
/// uses for its own per-symbol serialization.
#[derive(Default)]
pub struct SymbolLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, symbol: &str) -> Arc<Mutex<()>> {
        {
            let read = self.locks.read().await;
            if let Some(lock) = read.get(symbol) {
                return lock.clone();
            }
        }
        let mut write = self.locks.write().await;
        write
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn acquire(&self, symbol: &str) -> SymbolGuard {
        let lock = self.lock_for(symbol).await;
        let guard = lock.lock_owned().await;
        SymbolGuard { _guard: guard }
    }
}

pub struct SymbolGuard {
    _guard: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_symbol_serializes_different_symbols_do_not() {
        let locks = SymbolLocks::new();
        let g1 = locks.acquire("005930").await;
        let g2 = locks.acquire("000660").await; // different symbol, must not block
        drop(g1);
        drop(g2);

        let locks = Arc::new(locks);
        let locks2 = locks.clone();
        let g = locks.acquire("005930").await;
        let handle = tokio::spawn(async move {
            let _g2 = locks2.acquire("005930").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(g);
        handle.await.unwrap();
    }
}
