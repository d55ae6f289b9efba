//! The Risk Gateway: a deterministic, IO-free pre-trade check pipeline.
//! Callers resolve prices, existing exposure and sector membership from the
//! state store and hand the engine a fully-formed [`RiskCheckInput`]; the
//! engine itself never touches a clock, a broker, or the state store.

mod engine;
mod sector;
mod types;

pub use engine::evaluate;
pub use sector::SectorExposure;
pub use types::*;
