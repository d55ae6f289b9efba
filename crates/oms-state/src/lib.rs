//! The State Store: in-process home for positions, allocations, working
//! orders and account scalars. See [`StateStore`] for the concurrency
//! contract.

mod store;
mod types;

pub use store::StateStore;
pub use types::*;
