//! Broker Adapter: normalizes an external broker facade behind a narrow
//! trait, with retry-on-transient-error and client-side dedup layered on
//! top, plus a deterministic paper implementation for tests and local runs.

mod adapter;
mod paper;
mod retry;
mod types;

pub use adapter::BrokerAdapter;
pub use paper::PaperBroker;
pub use retry::{submit_with_retry, RetryOutcome};
pub use types::*;
