use crate::error::MarketResult;
use crate::id::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifies the unit of work that holds a lock
pub type OperationId = u64;

/// Information about a lock held on an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// The ID of the object being locked
    pub object_id: ObjectId,

    /// The operation that holds this lock
    pub operation: OperationId,

    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
}

/// Exclusive per-object locks held for the duration of a state transition
pub trait LockManager: Send + Sync + std::fmt::Debug {
    /// Allocate an identifier for a new unit of work
    fn begin_operation(&self) -> OperationId;

    /// Acquire an exclusive lock on an object for an operation
    ///
    /// # Parameters
    /// * `object_id` - The ID of the object to lock
    /// * `operation` - The operation acquiring the lock
    /// * `timeout` - How long to wait for a competing holder to release
    ///
    /// # Returns
    /// * `Ok(())` - The lock is held by `operation` (re-acquiring is a no-op)
    /// * `Err(MarketError::LockTimeout)` - The lock stayed busy past `timeout`
    fn acquire_lock(
        &self,
        object_id: &ObjectId,
        operation: OperationId,
        timeout: Duration,
    ) -> MarketResult<()>;

    /// Release a lock on an object
    ///
    /// # Returns
    /// * `true` - The lock was held by `operation` and has been released
    /// * `false` - The lock was not found or belongs to a different operation
    fn release_lock(&self, object_id: &ObjectId, operation: OperationId) -> bool;

    /// Current holder of the lock on an object, if any
    fn get_lock_info(&self, object_id: &ObjectId) -> Option<LockInfo>;
}

/// Guard that holds a lock on an object and releases it when dropped
#[derive(Debug)]
pub struct ObjectLockGuard<'a, M: LockManager + ?Sized> {
    object_id: ObjectId,
    operation: OperationId,
    lock_manager: &'a M,
    released: bool,
}

impl<'a, M: LockManager + ?Sized> ObjectLockGuard<'a, M> {
    /// Acquire the lock and wrap it in a guard
    pub fn acquire(
        object_id: ObjectId,
        operation: OperationId,
        lock_manager: &'a M,
        timeout: Duration,
    ) -> MarketResult<Self> {
        lock_manager.acquire_lock(&object_id, operation, timeout)?;

        Ok(Self {
            object_id,
            operation,
            lock_manager,
            released: false,
        })
    }

    /// Explicitly release the lock before the guard is dropped
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.lock_manager.release_lock(&self.object_id, self.operation)
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn operation(&self) -> OperationId {
        self.operation
    }
}

impl<'a, M: LockManager + ?Sized> Drop for ObjectLockGuard<'a, M> {
    fn drop(&mut self) {
        if !self.released {
            self.lock_manager.release_lock(&self.object_id, self.operation);
        }
    }
}
