//! Shared fixtures for marketplace tests

use crate::coordinator::NegotiationCoordinator;
use crate::ledger::RequestLedger;
use crate::registry::AssetRegistry;
use crate::users::UserDirectory;
use std::sync::Arc;
use std::time::Duration;
use tradepost_core::objects::{Asset, AssetFields, User};
use tradepost_storage::{InMemoryLockManager, SqliteStorage};

pub(crate) fn fields(name: &str) -> AssetFields {
    AssetFields::new(
        name,
        "Oil on canvas",
        "https://img.example.com/artwork.png",
    )
}

/// Components wired over one in-memory database
pub(crate) struct Fixture {
    pub locks: Arc<InMemoryLockManager>,
    pub users: UserDirectory<SqliteStorage>,
    pub registry: AssetRegistry<SqliteStorage>,
    pub ledger: RequestLedger<SqliteStorage>,
    pub coordinator: NegotiationCoordinator<SqliteStorage>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    pub fn with_lock_timeout(timeout: Duration) -> Self {
        let storage = Arc::new(SqliteStorage::in_memory().unwrap());
        let locks = Arc::new(InMemoryLockManager::new());

        Self {
            users: UserDirectory::new(storage.clone()),
            registry: AssetRegistry::new(storage.clone()),
            ledger: RequestLedger::new(storage.clone()),
            coordinator: NegotiationCoordinator::new(storage, locks.clone(), timeout),
            locks,
        }
    }

    pub fn user(&self, username: &str) -> User {
        self.users.register(username).unwrap()
    }

    pub fn asset(&self, creator: &User, name: &str) -> Asset {
        self.registry.create_asset(&creator.id, fields(name)).unwrap()
    }
}
