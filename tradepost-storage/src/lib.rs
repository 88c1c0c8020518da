pub mod lock_manager;
pub mod storage_traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export the main types for convenience
pub use storage_traits::{
    Acceptance, AcceptanceOutcome, AssetFilter, AssetStore, HolderChange, MarketStorage,
    RequestFilter, RequestStore, StatusTransition, UserStore,
};

pub use lock_manager::InMemoryLockManager;

// Re-export the storage implementations
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
