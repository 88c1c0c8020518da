use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tradepost_core::error::{MarketError, MarketResult, StorageError};
use tradepost_core::id::UserId;

/// Verifies opaque bearer credentials and resolves them to a user.
///
/// Issuing credentials and storing secrets is the provider's business; the marketplace
/// only ever sees the resolved user id.
pub trait IdentityProvider: Send + Sync {
    /// Resolve a credential to the user it was issued for
    ///
    /// # Returns
    /// `Err(MarketError::Authentication)` if the credential is missing, unknown or revoked
    fn verify_credential(&self, token: &str) -> MarketResult<UserId>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> MarketResult<&str> {
    match header.trim().split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(MarketError::Authentication(
            "Not authorized, no token".to_string(),
        )),
    }
}

/// Identity provider backed by a fixed table of tokens
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    tokens: RwLock<HashMap<String, UserId>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a token to a user, replacing any previous binding of that token
    pub fn register(&self, token: impl Into<String>, user: UserId) -> MarketResult<()> {
        self.write_table()?.insert(token.into(), user);
        Ok(())
    }

    /// Remove a token. Returns whether it was known.
    pub fn revoke(&self, token: &str) -> MarketResult<bool> {
        Ok(self.write_table()?.remove(token).is_some())
    }

    fn read_table(&self) -> MarketResult<RwLockReadGuard<'_, HashMap<String, UserId>>> {
        self.tokens.read().map_err(|e| poisoned(&e.to_string()))
    }

    fn write_table(&self) -> MarketResult<RwLockWriteGuard<'_, HashMap<String, UserId>>> {
        self.tokens.write().map_err(|e| poisoned(&e.to_string()))
    }
}

fn poisoned(reason: &str) -> MarketError {
    MarketError::Storage(StorageError::Other(format!(
        "Failed to access token table: {}",
        reason
    )))
}

impl IdentityProvider for StaticIdentityProvider {
    fn verify_credential(&self, token: &str) -> MarketResult<UserId> {
        if token.is_empty() {
            return Err(MarketError::Authentication(
                "Not authorized, no token".to_string(),
            ));
        }

        self.read_table()?
            .get(token)
            .copied()
            .ok_or_else(|| MarketError::Authentication("Not authorized, token failed".to_string()))
    }
}
