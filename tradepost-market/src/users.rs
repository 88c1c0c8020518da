use std::sync::Arc;
use tradepost_core::error::{MarketError, MarketResult, StorageError};
use tradepost_core::id::UserId;
use tradepost_core::objects::User;
use tradepost_storage::UserStore;

/// Directory of registered users, used to resolve creator and holder references
pub struct UserDirectory<S> {
    storage: Arc<S>,
}

impl<S: UserStore> UserDirectory<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Register a new user under a unique username
    pub fn register(&self, username: &str) -> MarketResult<User> {
        let user = User::new(username)?;

        match self.storage.insert_user(&user) {
            Ok(()) => {
                log::info!("Registered user {} ({})", user.username, user.id);
                Ok(user)
            }
            Err(StorageError::Conflict(_)) => Err(MarketError::Validation(format!(
                "username {} is already taken",
                user.username
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user(&self, id: &UserId) -> MarketResult<User> {
        self.storage
            .get_user(id)?
            .ok_or_else(|| MarketError::not_found("User", id))
    }

    pub fn find_by_username(&self, username: &str) -> MarketResult<Option<User>> {
        Ok(self.storage.find_user_by_username(username.trim())?)
    }
}
