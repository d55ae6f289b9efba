//! The Intent Pipeline: the single entry point that orchestrates
//! validation, risk, arbitration, planning and broker execution under a
//! per-symbol mutex, with an idempotency cache in front of it all.

mod idempotency;
mod pipeline;
mod price;
mod symbol_lock;

pub use idempotency::IdempotencyStore;
pub use pipeline::OmsPipeline;
pub use price::{FixedPriceSource, PriceSource};
pub use symbol_lock::{SymbolGuard, SymbolLocks};
