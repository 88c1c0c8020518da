//! Tradepost asset marketplace
//!
//! This crate re-exports all the components of the marketplace.

pub use tradepost_core::*;
pub use tradepost_market::*;
pub use tradepost_storage::*;
