//! Authenticated entry points, one per marketplace route.

use crate::config::MarketConfig;
use crate::coordinator::NegotiationCoordinator;
use crate::identity::{bearer_token, IdentityProvider};
use crate::ledger::RequestLedger;
use crate::registry::AssetRegistry;
use crate::users::UserDirectory;
use std::sync::Arc;
use std::time::Duration;
use tradepost_core::error::{MarketError, MarketResult};
use tradepost_core::id::{AssetId, RequestId, UserId};
use tradepost_core::locks::LockManager;
use tradepost_core::objects::{
    Asset, AssetDetails, AssetFields, AssetUpdate, PurchaseRequest, User,
};
use tradepost_storage::{InMemoryLockManager, MarketStorage, SqliteStorage};

/// The marketplace service: user directory, asset registry, request ledger and
/// negotiation coordinator wired over one storage backend.
///
/// Every operation except [`Marketplace::register_user`] requires a credential, which is
/// resolved through the configured [`IdentityProvider`] to a registered user.
pub struct Marketplace<S = SqliteStorage, L = InMemoryLockManager>
where
    L: LockManager + ?Sized,
{
    users: UserDirectory<S>,
    coordinator: NegotiationCoordinator<S, L>,
    identity: Arc<dyn IdentityProvider>,
}

impl Marketplace<SqliteStorage, InMemoryLockManager> {
    /// Open the configured database and wire the marketplace over it
    pub fn open(config: &MarketConfig, identity: Arc<dyn IdentityProvider>) -> MarketResult<Self> {
        let storage = SqliteStorage::open(
            config.database.path.as_deref(),
            config.database.max_connections,
        )?;

        match storage.db_path() {
            Some(path) => log::info!("Marketplace opened at {}", path.display()),
            None => log::info!("Marketplace opened in memory"),
        }

        Ok(Self::with_storage(
            Arc::new(storage),
            Arc::new(InMemoryLockManager::new()),
            config.locks.timeout(),
            identity,
        ))
    }
}

impl<S, L> Marketplace<S, L>
where
    S: MarketStorage,
    L: LockManager + ?Sized,
{
    pub fn with_storage(
        storage: Arc<S>,
        locks: Arc<L>,
        lock_timeout: Duration,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            users: UserDirectory::new(storage.clone()),
            coordinator: NegotiationCoordinator::new(storage, locks, lock_timeout),
            identity,
        }
    }

    pub fn users(&self) -> &UserDirectory<S> {
        &self.users
    }

    pub fn registry(&self) -> &AssetRegistry<S> {
        self.coordinator.registry()
    }

    pub fn ledger(&self) -> &RequestLedger<S> {
        self.coordinator.ledger()
    }

    pub fn coordinator(&self) -> &NegotiationCoordinator<S, L> {
        &self.coordinator
    }

    pub fn register_user(&self, username: &str) -> MarketResult<User> {
        self.users.register(username)
    }

    /// Resolve a credential to a registered user
    pub fn authenticate(&self, token: &str) -> MarketResult<UserId> {
        let user_id = self.identity.verify_credential(token)?;

        match self.users.get_user(&user_id) {
            Ok(user) => Ok(user.id),
            Err(MarketError::NotFound(_)) => {
                log::warn!("Credential resolved to unknown user {}", user_id);
                Err(MarketError::Authentication(
                    "Not authorized, token failed".to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve an `Authorization` header value to a registered user
    pub fn authenticate_header(&self, header: &str) -> MarketResult<UserId> {
        self.authenticate(bearer_token(header)?)
    }

    pub fn create_asset(&self, token: &str, fields: AssetFields) -> MarketResult<Asset> {
        let caller = self.authenticate(token)?;
        self.registry().create_asset(&caller, fields)
    }

    pub fn update_asset(
        &self,
        token: &str,
        asset_id: &AssetId,
        update: AssetUpdate,
    ) -> MarketResult<Asset> {
        let caller = self.authenticate(token)?;
        self.registry().update_asset(asset_id, &caller, update)
    }

    pub fn publish_asset(&self, token: &str, asset_id: &AssetId) -> MarketResult<Asset> {
        let caller = self.authenticate(token)?;
        self.registry().publish_asset(asset_id, &caller)
    }

    pub fn asset_details(&self, token: &str, asset_id: &AssetId) -> MarketResult<AssetDetails> {
        self.authenticate(token)?;
        self.registry().get_asset(asset_id)
    }

    /// Assets created by `user_id`
    pub fn user_assets(&self, token: &str, user_id: &UserId) -> MarketResult<Vec<Asset>> {
        self.authenticate(token)?;
        self.registry().list_assets_by_creator(user_id)
    }

    pub fn published_assets(&self, token: &str) -> MarketResult<Vec<AssetDetails>> {
        self.authenticate(token)?;
        self.registry().list_published()
    }

    pub fn request_asset(
        &self,
        token: &str,
        asset_id: &AssetId,
        proposed_price: f64,
    ) -> MarketResult<PurchaseRequest> {
        let caller = self.authenticate(token)?;
        self.ledger().create_request(asset_id, &caller, proposed_price)
    }

    pub fn negotiate(
        &self,
        token: &str,
        request_id: &RequestId,
        new_price: f64,
    ) -> MarketResult<PurchaseRequest> {
        let caller = self.authenticate(token)?;
        self.coordinator
            .negotiate_request(request_id, &caller, new_price)
    }

    pub fn accept(
        &self,
        token: &str,
        request_id: &RequestId,
    ) -> MarketResult<(Asset, PurchaseRequest)> {
        let caller = self.authenticate(token)?;
        self.coordinator.accept_request(request_id, &caller)
    }

    pub fn deny(&self, token: &str, request_id: &RequestId) -> MarketResult<PurchaseRequest> {
        let caller = self.authenticate(token)?;
        self.coordinator.deny_request(request_id, &caller)
    }

    /// Requests made by `user_id`
    pub fn user_requests(
        &self,
        token: &str,
        user_id: &UserId,
    ) -> MarketResult<Vec<PurchaseRequest>> {
        self.authenticate(token)?;
        self.ledger().get_requests_by_requester(user_id)
    }

    /// Requests made against an asset
    pub fn asset_requests(
        &self,
        token: &str,
        asset_id: &AssetId,
    ) -> MarketResult<Vec<PurchaseRequest>> {
        self.authenticate(token)?;
        self.ledger().get_requests_for_asset(asset_id)
    }
}
