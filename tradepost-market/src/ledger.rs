use std::sync::Arc;
use tradepost_core::error::{MarketError, MarketResult};
use tradepost_core::id::{AssetId, RequestId, UserId};
use tradepost_core::objects::{
    require_price, timestamp_now, PurchaseRequest, RequestStatus, Resolution,
};
use tradepost_storage::{MarketStorage, RequestFilter, StatusTransition};

/// Records purchase requests and their Pending → Accepted | Denied lifecycle
pub struct RequestLedger<S> {
    storage: Arc<S>,
}

impl<S: MarketStorage> RequestLedger<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Open a pending request against an existing asset
    pub fn create_request(
        &self,
        asset_id: &AssetId,
        requester: &UserId,
        proposed_price: f64,
    ) -> MarketResult<PurchaseRequest> {
        let price = require_price(proposed_price)?;

        let asset = self
            .storage
            .get_asset(asset_id)?
            .ok_or_else(|| MarketError::not_found("Asset", asset_id))?;
        if self.storage.get_user(requester)?.is_none() {
            return Err(MarketError::not_found("User", requester));
        }
        if asset.is_held_by(requester) {
            return Err(MarketError::Validation(
                "cannot request an asset you already hold".to_string(),
            ));
        }

        let request = PurchaseRequest::new_pending(*asset_id, *requester, price);
        self.storage.insert_request(&request)?;

        log::info!(
            "Request {} opened on asset {} by {} at {}",
            request.id,
            asset_id,
            requester,
            price
        );
        Ok(request)
    }

    /// Revise the proposed price of a pending request. Only the requester may negotiate.
    pub fn negotiate(
        &self,
        request_id: &RequestId,
        actor: &UserId,
        new_price: f64,
    ) -> MarketResult<PurchaseRequest> {
        let mut request = self.get_request(request_id)?;

        if request.requester != *actor {
            log::warn!(
                "User {} attempted to negotiate request {} owned by {}",
                actor,
                request_id,
                request.requester
            );
            return Err(MarketError::Authorization(
                "Only the requester can negotiate this request".to_string(),
            ));
        }
        if !request.is_pending() {
            return Err(not_pending(&request));
        }
        let price = require_price(new_price)?;

        let at = timestamp_now();
        if !self.storage.update_pending_price(request_id, price, at)? {
            // Resolved between the read and the conditional write
            let current = self.get_request(request_id)?;
            return Err(not_pending(&current));
        }

        log::debug!(
            "Request {} renegotiated from {} to {}",
            request_id,
            request.proposed_price,
            price
        );
        request.proposed_price = price;
        request.updated_at = at;
        Ok(request)
    }

    pub fn get_request(&self, request_id: &RequestId) -> MarketResult<PurchaseRequest> {
        log::debug!("Loading request {}", request_id);
        self.storage
            .get_request(request_id)?
            .ok_or_else(|| MarketError::not_found("Request", request_id))
    }

    /// Requests made by a user, in creation order
    pub fn get_requests_by_requester(&self, requester: &UserId) -> MarketResult<Vec<PurchaseRequest>> {
        Ok(self
            .storage
            .find_requests(RequestFilter::Requester(*requester))?)
    }

    /// Requests made against an asset, in creation order
    pub fn get_requests_for_asset(&self, asset_id: &AssetId) -> MarketResult<Vec<PurchaseRequest>> {
        Ok(self.storage.find_requests(RequestFilter::Asset(*asset_id))?)
    }

    /// Resolve a pending request on its own, without touching the asset
    pub(crate) fn mark_terminal(
        &self,
        request_id: &RequestId,
        resolution: Resolution,
    ) -> MarketResult<PurchaseRequest> {
        let mut request = self.get_request(request_id)?;
        if !request.is_pending() {
            return Err(not_pending(&request));
        }

        let status = RequestStatus::from(resolution);
        let at = timestamp_now();
        if !self.storage.resolve_pending(request_id, status, at)? {
            let current = self.get_request(request_id)?;
            return Err(not_pending(&current));
        }

        request.status = status;
        request.updated_at = at;
        Ok(request)
    }

    /// Plan the Pending → Accepted transition that accompanies a holder change
    pub(crate) fn acceptance_transition(
        &self,
        request: &PurchaseRequest,
    ) -> MarketResult<StatusTransition> {
        if !request.is_pending() {
            return Err(not_pending(request));
        }
        Ok(StatusTransition {
            request_id: request.id,
            to: RequestStatus::Accepted,
            at: timestamp_now(),
        })
    }
}

pub(crate) fn not_pending(request: &PurchaseRequest) -> MarketError {
    MarketError::State(format!(
        "Request {} is already {}",
        request.id,
        request.status.as_str()
    ))
}
