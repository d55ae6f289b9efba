use async_trait::async_trait;

/// Abstraction over a live quote source. The OMS core does not fetch
/// quotes itself — it is handed one by whatever feeds intents (KIS market
/// data, a paper-trading fixture, a test double).
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn current_price_micros(&self, symbol: &str) -> Option<i64>;
}

/// Fixed-price source for tests and paper runs where quotes are supplied
/// out of band.
#[derive(Default)]
pub struct FixedPriceSource {
    prices: std::sync::RwLock<std::collections::HashMap<String, i64>>,
}

impl FixedPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, symbol: impl Into<String>, price_micros: i64) {
        self.prices.write().unwrap().insert(symbol.into(), price_micros);
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    async fn current_price_micros(&self, symbol: &str) -> Option<i64> {
        self.prices.read().unwrap().get(symbol).copied()
    }
}
