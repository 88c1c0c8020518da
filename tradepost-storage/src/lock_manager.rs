use chrono::Utc;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tradepost_core::error::{MarketError, MarketResult, StorageError};
use tradepost_core::id::ObjectId;
use tradepost_core::locks::{LockInfo, LockManager, OperationId};

/// In-process lock manager.
///
/// Locks are exclusive and re-entrant for the operation that holds them. Waiters block
/// on a condition variable until the holder releases or their timeout runs out.
pub struct InMemoryLockManager {
    locks: Mutex<HashMap<ObjectId, LockInfo>>,
    released: Condvar,
    next_operation: AtomicU64,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            next_operation: AtomicU64::new(1),
        }
    }

    /// Number of objects currently locked
    pub fn held_count(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    fn table(&self) -> MarketResult<MutexGuard<'_, HashMap<ObjectId, LockInfo>>> {
        self.locks.lock().map_err(|e| {
            MarketError::Storage(StorageError::Other(format!(
                "Failed to acquire lock table: {}",
                e
            )))
        })
    }
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager for InMemoryLockManager {
    fn begin_operation(&self) -> OperationId {
        self.next_operation.fetch_add(1, Ordering::Relaxed)
    }

    fn acquire_lock(
        &self,
        object_id: &ObjectId,
        operation: OperationId,
        timeout: Duration,
    ) -> MarketResult<()> {
        let deadline = Instant::now() + timeout;
        let mut locks = self.table()?;

        loop {
            let holder = locks.get(object_id).map(|info| info.operation);
            match holder {
                None => {
                    locks.insert(
                        *object_id,
                        LockInfo {
                            object_id: *object_id,
                            operation,
                            acquired_at: Utc::now(),
                        },
                    );
                    return Ok(());
                }
                Some(current) if current == operation => return Ok(()),
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline {
                        log::warn!("Lock on {} not released within {:?}", object_id, timeout);
                        return Err(MarketError::LockTimeout(*object_id));
                    }

                    let (guard, _) = self
                        .released
                        .wait_timeout(locks, deadline - now)
                        .map_err(|e| {
                            MarketError::Storage(StorageError::Other(format!(
                                "Failed to wait for lock: {}",
                                e
                            )))
                        })?;
                    locks = guard;
                }
            }
        }
    }

    fn release_lock(&self, object_id: &ObjectId, operation: OperationId) -> bool {
        let Ok(mut locks) = self.locks.lock() else {
            return false;
        };

        let held = matches!(locks.get(object_id), Some(info) if info.operation == operation);
        if held {
            locks.remove(object_id);
            self.released.notify_all();
        }
        held
    }

    fn get_lock_info(&self, object_id: &ObjectId) -> Option<LockInfo> {
        self.locks
            .lock()
            .ok()
            .and_then(|locks| locks.get(object_id).cloned())
    }
}

impl Debug for InMemoryLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLockManager")
            .field("held", &self.held_count())
            .finish()
    }
}
