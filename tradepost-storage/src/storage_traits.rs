use chrono::{DateTime, Utc};
use tradepost_core::error::StorageError;
use tradepost_core::id::{AssetId, RequestId, UserId};
use tradepost_core::objects::{Asset, AssetStatus, PurchaseRequest, RequestStatus, User};

/// Selects a subset of assets. Results are always returned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFilter {
    Creator(UserId),
    Holder(UserId),
    Status(AssetStatus),
}

/// Selects a subset of purchase requests. Results are always returned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFilter {
    Requester(UserId),
    Asset(AssetId),
}

/// Storage interface for user identity projections
pub trait UserStore {
    /// Store a new user
    ///
    /// # Returns
    /// `Err(StorageError::Conflict)` if the username is already taken
    fn insert_user(&self, user: &User) -> Result<(), StorageError>;

    /// Get a user by ID
    fn get_user(&self, id: &UserId) -> Result<Option<User>, StorageError>;

    /// Get a user by username
    fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError>;
}

/// Storage interface for assets
pub trait AssetStore {
    /// Store a newly created asset, including its trading journey
    fn insert_asset(&self, asset: &Asset) -> Result<(), StorageError>;

    /// Get an asset by ID, with its trading journey in order
    fn get_asset(&self, id: &AssetId) -> Result<Option<Asset>, StorageError>;

    /// Persist the descriptive fields (name, description, image) of an existing asset.
    ///
    /// Status, creator, holder and trading journey are never written through this call;
    /// holder changes go through [`MarketStorage::commit_acceptance`].
    ///
    /// # Returns
    /// `Err(StorageError::NotFound)` if the asset does not exist
    fn update_asset_details(&self, asset: &Asset) -> Result<(), StorageError>;

    /// Set an asset's status to published. Publishing twice is not an error.
    ///
    /// # Returns
    /// `Err(StorageError::NotFound)` if the asset does not exist
    fn mark_published(&self, id: &AssetId) -> Result<(), StorageError>;

    /// List assets matching a filter
    fn find_assets(&self, filter: AssetFilter) -> Result<Vec<Asset>, StorageError>;
}

/// Storage interface for purchase requests
pub trait RequestStore {
    /// Store a newly created request
    fn insert_request(&self, request: &PurchaseRequest) -> Result<(), StorageError>;

    /// Get a request by ID
    fn get_request(&self, id: &RequestId) -> Result<Option<PurchaseRequest>, StorageError>;

    /// List requests matching a filter
    fn find_requests(&self, filter: RequestFilter) -> Result<Vec<PurchaseRequest>, StorageError>;

    /// Change the proposed price of a request, provided it is still pending
    ///
    /// # Returns
    /// * `Ok(true)` - The price was updated
    /// * `Ok(false)` - The request is missing or no longer pending; nothing was written
    fn update_pending_price(
        &self,
        id: &RequestId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Move a pending request to a terminal status
    ///
    /// # Returns
    /// * `Ok(true)` - The transition was applied
    /// * `Ok(false)` - The request is missing or no longer pending; nothing was written
    fn resolve_pending(
        &self,
        id: &RequestId,
        status: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;
}

/// Planned move of an asset from one holder to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderChange {
    pub asset_id: AssetId,
    /// The holder observed when the change was planned
    pub expected_holder: UserId,
    pub new_holder: UserId,
    pub at: DateTime<Utc>,
}

/// Planned move of a pending request to a terminal status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub request_id: RequestId,
    pub to: RequestStatus,
    pub at: DateTime<Utc>,
}

/// The two writes that make up an accepted purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub holder_change: HolderChange,
    pub transition: StatusTransition,
}

/// Result of attempting to commit an acceptance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptanceOutcome {
    /// Both writes were applied
    Committed,
    /// The request was no longer pending; nothing was written
    RequestNotPending,
    /// The asset's holder differed from the expected holder, or already was the new
    /// holder; nothing was written
    HolderChanged,
}

/// Main storage interface for the marketplace
pub trait MarketStorage: UserStore + AssetStore + RequestStore + Send + Sync {
    /// Apply a holder change and a request transition as a single transaction.
    ///
    /// Each write is conditional on the state it was planned against: the request must
    /// still be pending and the asset must still be held by `expected_holder`, who must
    /// differ from `new_holder`. If either
    /// condition fails the transaction is rolled back and the outcome says which one.
    fn commit_acceptance(&self, acceptance: &Acceptance)
        -> Result<AcceptanceOutcome, StorageError>;
}
