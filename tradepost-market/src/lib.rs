pub mod config;
pub mod coordinator;
pub mod identity;
pub mod ledger;
pub mod marketplace;
pub mod registry;
pub mod users;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export the main types for convenience
pub use config::{ConfigError, DatabaseConfig, LockConfig, MarketConfig};
pub use coordinator::NegotiationCoordinator;
pub use identity::{bearer_token, IdentityProvider, StaticIdentityProvider};
pub use ledger::RequestLedger;
pub use marketplace::Marketplace;
pub use registry::AssetRegistry;
pub use users::UserDirectory;
