pub mod error;
pub mod id;
pub mod locks;
pub mod objects;

// Re-export the main types for convenience
pub use error::{MarketError, MarketResult, StorageError};
pub use id::{AssetId, IdKind, IdParseError, ObjectId, RequestId, UserId};
pub use locks::{LockInfo, LockManager, ObjectLockGuard, OperationId};
pub use objects::{
    timestamp_now, Asset, AssetDetails, AssetFields, AssetStatus, AssetUpdate, HolderRecord,
    PurchaseRequest, RequestStatus, Resolution, User,
};
