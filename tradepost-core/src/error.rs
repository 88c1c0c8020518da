use crate::id::ObjectId;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with marketplace storage
#[derive(Error, Debug)]
pub enum StorageError {
    /// Errors that occur with the underlying storage backend
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization errors, including malformed stored rows
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Errors related to missing data
    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Generic errors that don't fit in other categories
    #[error("Other error: {0}")]
    Other(String),

    /// Anyhow error wrapper for error context
    #[error(transparent)]
    Context(#[from] anyhow::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StorageError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::Conflict(db.message().to_string())
            }
            _ => StorageError::Database(err.to_string()),
        }
    }
}

/// Errors raised by marketplace operations.
///
/// Every variant maps onto exactly one transport status code through
/// [`MarketError::status_code`]; the boundary layer never has to inspect messages.
#[derive(Error, Debug)]
pub enum MarketError {
    /// Malformed or out-of-range input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The actor lacks rights for the requested transition
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// The operation is invalid for the entity's current lifecycle state
    #[error("Invalid state: {0}")]
    State(String),

    /// The presented credential is missing or invalid
    #[error("Not authenticated: {0}")]
    Authentication(String),

    /// Another operation held the lock on this object for too long
    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(ObjectId),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl MarketError {
    pub fn not_found(what: &str, id: &ObjectId) -> Self {
        MarketError::NotFound(format!("{} {} not found", what, id))
    }

    /// Status code the transport boundary reports for this error
    pub fn status_code(&self) -> u16 {
        match self {
            MarketError::Validation(_) => 400,
            MarketError::NotFound(_) => 404,
            MarketError::Authorization(_) | MarketError::Authentication(_) => 401,
            MarketError::State(_) | MarketError::LockTimeout(_) => 409,
            MarketError::Storage(_) => 500,
        }
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
