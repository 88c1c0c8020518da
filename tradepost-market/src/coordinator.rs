use crate::ledger::{not_pending, RequestLedger};
use crate::registry::AssetRegistry;
use std::sync::Arc;
use std::time::Duration;
use tradepost_core::error::{MarketError, MarketResult};
use tradepost_core::id::{ObjectId, RequestId, UserId};
use tradepost_core::locks::{LockManager, ObjectLockGuard, OperationId};
use tradepost_core::objects::{Asset, PurchaseRequest, Resolution};
use tradepost_storage::{Acceptance, AcceptanceOutcome, InMemoryLockManager, MarketStorage};

/// Drives request transitions that span the asset registry and the request ledger.
///
/// Accept and deny are authorized by whoever holds the asset when the call is made, and
/// run under exclusive locks on the asset and then the request. Acceptance commits the
/// holder change and the request transition in one storage transaction, each write
/// conditional on the state observed under the locks.
pub struct NegotiationCoordinator<S, L = InMemoryLockManager>
where
    L: LockManager + ?Sized,
{
    storage: Arc<S>,
    registry: AssetRegistry<S>,
    ledger: RequestLedger<S>,
    locks: Arc<L>,
    lock_timeout: Duration,
}

impl<S, L> NegotiationCoordinator<S, L>
where
    S: MarketStorage,
    L: LockManager + ?Sized,
{
    pub fn new(storage: Arc<S>, locks: Arc<L>, lock_timeout: Duration) -> Self {
        Self {
            registry: AssetRegistry::new(storage.clone()),
            ledger: RequestLedger::new(storage.clone()),
            storage,
            locks,
            lock_timeout,
        }
    }

    pub fn registry(&self) -> &AssetRegistry<S> {
        &self.registry
    }

    pub fn ledger(&self) -> &RequestLedger<S> {
        &self.ledger
    }

    /// Accept a pending request: the requester becomes the asset's holder and the request
    /// becomes Accepted, or nothing changes at all.
    pub fn accept_request(
        &self,
        request_id: &RequestId,
        actor: &UserId,
    ) -> MarketResult<(Asset, PurchaseRequest)> {
        let request = self.ledger.get_request(request_id)?;

        let operation = self.locks.begin_operation();
        let _asset_guard = self.lock(&request.asset, operation)?;
        let _request_guard = self.lock(request_id, operation)?;

        let (asset, request) = self.load_for_resolution(request_id, actor, "accept")?;

        let acceptance = Acceptance {
            transition: self.ledger.acceptance_transition(&request)?,
            holder_change: self
                .registry
                .reassign_holder(&asset, &request.requester)
                .map_err(rejected)?,
        };

        match self.storage.commit_acceptance(&acceptance)? {
            AcceptanceOutcome::Committed => {}
            AcceptanceOutcome::RequestNotPending => {
                let current = self.ledger.get_request(request_id)?;
                return Err(rejected(not_pending(&current)));
            }
            AcceptanceOutcome::HolderChanged => {
                return Err(rejected(MarketError::Authorization(
                    "Asset changed hands before the request could be accepted".to_string(),
                )));
            }
        }

        let asset = self.registry.load_asset(&asset.id)?;
        let request = self.ledger.get_request(request_id)?;

        log::info!(
            "Request {} accepted: asset {} moved from {} to {} at {}",
            request.id,
            asset.id,
            actor,
            asset.current_holder,
            request.proposed_price
        );
        Ok((asset, request))
    }

    /// Deny a pending request. The asset is left untouched.
    pub fn deny_request(
        &self,
        request_id: &RequestId,
        actor: &UserId,
    ) -> MarketResult<PurchaseRequest> {
        let request = self.ledger.get_request(request_id)?;

        let operation = self.locks.begin_operation();
        let _asset_guard = self.lock(&request.asset, operation)?;
        let _request_guard = self.lock(request_id, operation)?;

        let (asset, _) = self.load_for_resolution(request_id, actor, "deny")?;

        let request = self
            .ledger
            .mark_terminal(request_id, Resolution::Denied)
            .map_err(rejected)?;

        log::info!(
            "Request {} on asset {} denied by {}",
            request.id,
            asset.id,
            actor
        );
        Ok(request)
    }

    /// Revise a pending request's price on behalf of its requester
    pub fn negotiate_request(
        &self,
        request_id: &RequestId,
        actor: &UserId,
        new_price: f64,
    ) -> MarketResult<PurchaseRequest> {
        let operation = self.locks.begin_operation();
        let _request_guard = self.lock(request_id, operation)?;

        self.ledger.negotiate(request_id, actor, new_price)
    }

    fn lock(
        &self,
        object_id: &ObjectId,
        operation: OperationId,
    ) -> MarketResult<ObjectLockGuard<'_, L>> {
        ObjectLockGuard::acquire(*object_id, operation, &*self.locks, self.lock_timeout)
    }

    /// Re-read the request and its asset under the locks and check the actor may resolve it
    fn load_for_resolution(
        &self,
        request_id: &RequestId,
        actor: &UserId,
        action: &str,
    ) -> MarketResult<(Asset, PurchaseRequest)> {
        let request = self.ledger.get_request(request_id)?;
        if !request.is_pending() {
            return Err(rejected(not_pending(&request)));
        }

        let asset = self.registry.load_asset(&request.asset)?;
        if !asset.is_held_by(actor) {
            log::warn!(
                "User {} attempted to {} request {} on asset {} held by {}",
                actor,
                action,
                request_id,
                asset.id,
                asset.current_holder
            );
            return Err(MarketError::Authorization(format!(
                "Only the current holder can {} this request",
                action
            )));
        }

        Ok((asset, request))
    }
}

fn rejected(err: MarketError) -> MarketError {
    if matches!(err, MarketError::State(_) | MarketError::Authorization(_)) {
        log::warn!("Transition rejected: {}", err);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Fixture;
    use std::sync::Barrier;
    use tradepost_core::id::IdKind;
    use tradepost_core::objects::{HolderRecord, RequestStatus};

    #[test]
    fn test_negotiate_then_accept_then_deny() {
        let fx = Fixture::new();
        let u1 = fx.user("u1");
        let u2 = fx.user("u2");
        let asset = fx.asset(&u1, "A");

        let request = fx.ledger.create_request(&asset.id, &u2.id, 100.0).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);

        let request = fx
            .coordinator
            .negotiate_request(&request.id, &u2.id, 150.0)
            .unwrap();
        assert_eq!(request.proposed_price, 150.0);
        assert_eq!(request.status, RequestStatus::Pending);

        let (asset, accepted) = fx.coordinator.accept_request(&request.id, &u1.id).unwrap();
        assert_eq!(asset.current_holder, u2.id);
        assert_eq!(asset.creator, u1.id);
        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert_eq!(accepted.proposed_price, 150.0);
        assert_eq!(asset.trading_journey.len(), 1);
        assert_eq!(asset.trading_journey[0].holder, u2.id);

        let err = fx.coordinator.deny_request(&request.id, &u1.id).unwrap_err();
        assert!(matches!(err, MarketError::State(_)));
        assert_eq!(err.status_code(), 409);

        assert_eq!(
            fx.ledger.get_request(&request.id).unwrap().status,
            RequestStatus::Accepted
        );
        assert_eq!(fx.locks.held_count(), 0);
    }

    #[test]
    fn test_non_holder_cannot_accept() {
        let fx = Fixture::new();
        let u1 = fx.user("u1");
        let u2 = fx.user("u2");
        let u3 = fx.user("u3");
        let asset = fx.asset(&u1, "A");
        let request = fx.ledger.create_request(&asset.id, &u2.id, 100.0).unwrap();

        let err = fx.coordinator.accept_request(&request.id, &u3.id).unwrap_err();
        assert!(matches!(err, MarketError::Authorization(_)));

        // The requester cannot accept their own offer either
        assert!(matches!(
            fx.coordinator.accept_request(&request.id, &u2.id),
            Err(MarketError::Authorization(_))
        ));
        assert!(matches!(
            fx.coordinator.deny_request(&request.id, &u3.id),
            Err(MarketError::Authorization(_))
        ));

        assert_eq!(fx.registry.load_asset(&asset.id).unwrap(), asset);
        assert_eq!(fx.ledger.get_request(&request.id).unwrap(), request);
    }

    #[test]
    fn test_holder_cannot_negotiate() {
        let fx = Fixture::new();
        let u1 = fx.user("u1");
        let u2 = fx.user("u2");
        let asset = fx.asset(&u1, "A");
        let request = fx.ledger.create_request(&asset.id, &u2.id, 100.0).unwrap();

        assert!(matches!(
            fx.coordinator.negotiate_request(&request.id, &u1.id, 80.0),
            Err(MarketError::Authorization(_))
        ));
        assert_eq!(fx.ledger.get_request(&request.id).unwrap(), request);
    }

    #[test]
    fn test_terminal_requests_are_frozen() {
        let fx = Fixture::new();
        let u1 = fx.user("u1");
        let u2 = fx.user("u2");
        let asset = fx.asset(&u1, "A");
        let request = fx.ledger.create_request(&asset.id, &u2.id, 100.0).unwrap();

        let denied = fx.coordinator.deny_request(&request.id, &u1.id).unwrap();
        assert_eq!(denied.status, RequestStatus::Denied);

        assert!(matches!(
            fx.coordinator.negotiate_request(&request.id, &u2.id, 120.0),
            Err(MarketError::State(_))
        ));
        assert!(matches!(
            fx.coordinator.accept_request(&request.id, &u1.id),
            Err(MarketError::State(_))
        ));
        assert!(matches!(
            fx.coordinator.deny_request(&request.id, &u1.id),
            Err(MarketError::State(_))
        ));

        let stored = fx.ledger.get_request(&request.id).unwrap();
        assert_eq!(stored, denied);
        assert_eq!(fx.registry.load_asset(&asset.id).unwrap(), asset);
    }

    #[test]
    fn test_missing_request() {
        let fx = Fixture::new();
        let u1 = fx.user("u1");
        let missing = ObjectId::generate(IdKind::Request);

        assert!(matches!(
            fx.coordinator.accept_request(&missing, &u1.id),
            Err(MarketError::NotFound(_))
        ));
        assert!(matches!(
            fx.coordinator.deny_request(&missing, &u1.id),
            Err(MarketError::NotFound(_))
        ));
        assert!(matches!(
            fx.coordinator.negotiate_request(&missing, &u1.id, 10.0),
            Err(MarketError::NotFound(_))
        ));
    }

    #[test]
    fn test_holder_is_evaluated_at_call_time() {
        let fx = Fixture::new();
        let u1 = fx.user("u1");
        let u2 = fx.user("u2");
        let u3 = fx.user("u3");
        let asset = fx.asset(&u1, "A");

        let from_u2 = fx.ledger.create_request(&asset.id, &u2.id, 100.0).unwrap();
        let from_u3 = fx.ledger.create_request(&asset.id, &u3.id, 90.0).unwrap();

        fx.coordinator.accept_request(&from_u2.id, &u1.id).unwrap();

        // The sibling request stays pending but now belongs to u2 to decide
        let sibling = fx.ledger.get_request(&from_u3.id).unwrap();
        assert_eq!(sibling.status, RequestStatus::Pending);
        assert!(matches!(
            fx.coordinator.accept_request(&from_u3.id, &u1.id),
            Err(MarketError::Authorization(_))
        ));

        let (asset, accepted) = fx.coordinator.accept_request(&from_u3.id, &u2.id).unwrap();
        assert_eq!(asset.current_holder, u3.id);
        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert_eq!(
            asset
                .trading_journey
                .iter()
                .map(|record: &HolderRecord| record.holder)
                .collect::<Vec<_>>(),
            vec![u2.id, u3.id]
        );
        assert_eq!(asset.creator, u1.id);
    }

    #[test]
    fn test_holder_cannot_accept_own_request() {
        let fx = Fixture::new();
        let u1 = fx.user("u1");
        let u2 = fx.user("u2");
        let asset = fx.asset(&u1, "A");

        let first = fx.ledger.create_request(&asset.id, &u2.id, 100.0).unwrap();
        let second = fx.ledger.create_request(&asset.id, &u2.id, 200.0).unwrap();
        fx.coordinator.accept_request(&first.id, &u1.id).unwrap();

        // u2 now holds the asset their second request asks for
        let err = fx.coordinator.accept_request(&second.id, &u2.id).unwrap_err();
        assert!(matches!(err, MarketError::State(_)));
        assert_eq!(err.status_code(), 409);

        let asset = fx.registry.load_asset(&asset.id).unwrap();
        assert_eq!(asset.current_holder, u2.id);
        assert_eq!(asset.trading_journey.len(), 1);
        assert_eq!(
            fx.ledger.get_request(&second.id).unwrap().status,
            RequestStatus::Pending
        );

        // The stale request can still be closed
        let denied = fx.coordinator.deny_request(&second.id, &u2.id).unwrap();
        assert_eq!(denied.status, RequestStatus::Denied);
        assert_eq!(fx.locks.held_count(), 0);
    }

    #[test]
    fn test_concurrent_accept_and_deny() {
        let fx = Fixture::new();
        let u1 = fx.user("u1");
        let u2 = fx.user("u2");
        let asset = fx.asset(&u1, "A");
        let request = fx.ledger.create_request(&asset.id, &u2.id, 100.0).unwrap();

        let barrier = Barrier::new(2);
        let (accepted, denied) = std::thread::scope(|scope| {
            let accept = scope.spawn(|| {
                barrier.wait();
                fx.coordinator.accept_request(&request.id, &u1.id).map(|_| ())
            });
            let deny = scope.spawn(|| {
                barrier.wait();
                fx.coordinator.deny_request(&request.id, &u1.id).map(|_| ())
            });
            (accept.join().unwrap(), deny.join().unwrap())
        });

        assert!(accepted.is_ok() != denied.is_ok());
        let loser = accepted.err().or(denied.err()).unwrap();
        assert!(matches!(loser, MarketError::State(_)));

        let stored = fx.ledger.get_request(&request.id).unwrap();
        let asset = fx.registry.load_asset(&asset.id).unwrap();
        match stored.status {
            RequestStatus::Accepted => assert_eq!(asset.current_holder, u2.id),
            RequestStatus::Denied => {
                assert_eq!(asset.current_holder, u1.id);
                assert!(asset.trading_journey.is_empty());
            }
            RequestStatus::Pending => panic!("request left pending"),
        }
        assert_eq!(fx.locks.held_count(), 0);
    }

    #[test]
    fn test_concurrent_accepts_of_sibling_requests() {
        let fx = Fixture::new();
        let u1 = fx.user("u1");
        let u2 = fx.user("u2");
        let u3 = fx.user("u3");
        let asset = fx.asset(&u1, "A");
        let first = fx.ledger.create_request(&asset.id, &u2.id, 100.0).unwrap();
        let second = fx.ledger.create_request(&asset.id, &u3.id, 100.0).unwrap();

        let barrier = Barrier::new(2);
        let results = std::thread::scope(|scope| {
            let handles = [first.id, second.id].map(|id| {
                let barrier = &barrier;
                let fx = &fx;
                let u1 = &u1;
                scope.spawn(move || {
                    barrier.wait();
                    fx.coordinator.accept_request(&id, &u1.id).map(|_| ())
                })
            });
            handles.map(|handle| handle.join().unwrap())
        });

        // u1 can only hand the asset over once
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(MarketError::Authorization(_)))));

        let asset = fx.registry.load_asset(&asset.id).unwrap();
        assert_eq!(asset.trading_journey.len(), 1);
        assert!(asset.current_holder == u2.id || asset.current_holder == u3.id);
    }

    #[test]
    fn test_lock_timeout() {
        let fx = Fixture::with_lock_timeout(Duration::from_millis(50));
        let u1 = fx.user("u1");
        let u2 = fx.user("u2");
        let asset = fx.asset(&u1, "A");
        let request = fx.ledger.create_request(&asset.id, &u2.id, 100.0).unwrap();

        let outside = fx.locks.begin_operation();
        fx.locks
            .acquire_lock(&asset.id, outside, Duration::from_millis(10))
            .unwrap();

        let err = fx.coordinator.accept_request(&request.id, &u1.id).unwrap_err();
        assert!(matches!(err, MarketError::LockTimeout(id) if id == asset.id));
        assert_eq!(err.status_code(), 409);
        assert_eq!(
            fx.ledger.get_request(&request.id).unwrap().status,
            RequestStatus::Pending
        );

        assert!(fx.locks.release_lock(&asset.id, outside));
        fx.coordinator.accept_request(&request.id, &u1.id).unwrap();
    }
}
