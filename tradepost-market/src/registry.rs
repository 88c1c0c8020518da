use std::sync::Arc;
use tradepost_core::error::{MarketError, MarketResult};
use tradepost_core::id::{AssetId, UserId};
use tradepost_core::objects::{
    timestamp_now, Asset, AssetDetails, AssetFields, AssetStatus, AssetUpdate, User,
};
use tradepost_storage::{AssetFilter, HolderChange, MarketStorage};

/// Owns asset records and their draft/published lifecycle.
///
/// Descriptive edits and publishing are reserved to the asset's creator. Holder changes
/// are only ever planned here; the negotiation coordinator commits them together with
/// the request they settle.
pub struct AssetRegistry<S> {
    storage: Arc<S>,
}

impl<S: MarketStorage> AssetRegistry<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Create a draft asset held by its creator. Nothing is stored if validation fails.
    pub fn create_asset(&self, creator: &UserId, fields: AssetFields) -> MarketResult<Asset> {
        let fields = fields.validate()?;
        self.require_user(creator)?;

        let asset = Asset::new_draft(*creator, fields);
        self.storage.insert_asset(&asset)?;

        log::info!("Created asset {} ({}) for {}", asset.id, asset.name, creator);
        Ok(asset)
    }

    /// Apply a partial update to an asset's descriptive fields. Allowed in any status.
    pub fn update_asset(
        &self,
        asset_id: &AssetId,
        editor: &UserId,
        update: AssetUpdate,
    ) -> MarketResult<Asset> {
        let mut asset = self.load_asset(asset_id)?;
        authorize_creator(&asset, editor, "update")?;

        let update = update.validate()?;
        if update.is_empty() {
            return Ok(asset);
        }

        update.apply_to(&mut asset);
        self.storage.update_asset_details(&asset)?;

        log::debug!("Updated asset {}", asset.id);
        Ok(asset)
    }

    /// Publish an asset. Publishing an already published asset succeeds unchanged.
    pub fn publish_asset(&self, asset_id: &AssetId, editor: &UserId) -> MarketResult<Asset> {
        let mut asset = self.load_asset(asset_id)?;
        authorize_creator(&asset, editor, "publish")?;

        self.storage.mark_published(asset_id)?;
        if !asset.is_published() {
            log::info!("Published asset {}", asset.id);
        }
        asset.status = AssetStatus::Published;

        Ok(asset)
    }

    /// Asset with display projections of its creator and current holder
    pub fn get_asset(&self, asset_id: &AssetId) -> MarketResult<AssetDetails> {
        let asset = self.load_asset(asset_id)?;
        self.project(asset)
    }

    fn project(&self, asset: Asset) -> MarketResult<AssetDetails> {
        let creator_profile = self.require_user(&asset.creator)?;
        let holder_profile = if asset.current_holder == asset.creator {
            creator_profile.clone()
        } else {
            self.require_user(&asset.current_holder)?
        };

        Ok(AssetDetails {
            asset,
            creator_profile,
            holder_profile,
        })
    }

    /// Raw asset record without projections
    pub fn load_asset(&self, asset_id: &AssetId) -> MarketResult<Asset> {
        log::debug!("Loading asset {}", asset_id);
        self.storage
            .get_asset(asset_id)?
            .ok_or_else(|| MarketError::not_found("Asset", asset_id))
    }

    /// Assets created by a user, in creation order
    pub fn list_assets_by_creator(&self, creator: &UserId) -> MarketResult<Vec<Asset>> {
        Ok(self.storage.find_assets(AssetFilter::Creator(*creator))?)
    }

    /// Assets currently held by a user, in creation order
    pub fn list_assets_by_holder(&self, holder: &UserId) -> MarketResult<Vec<Asset>> {
        Ok(self.storage.find_assets(AssetFilter::Holder(*holder))?)
    }

    /// Every published asset with its creator and holder profiles, in creation order
    pub fn list_published(&self) -> MarketResult<Vec<AssetDetails>> {
        self.storage
            .find_assets(AssetFilter::Status(AssetStatus::Published))?
            .into_iter()
            .map(|asset| self.project(asset))
            .collect()
    }

    /// Plan moving `asset` to `new_holder`.
    ///
    /// The change is conditional on the holder observed in `asset`; it only takes effect
    /// when committed alongside the accepted request. Moving an asset to the user who
    /// already holds it is a `State` error.
    pub(crate) fn reassign_holder(
        &self,
        asset: &Asset,
        new_holder: &UserId,
    ) -> MarketResult<HolderChange> {
        if asset.is_held_by(new_holder) {
            return Err(MarketError::State(format!(
                "User {} already holds asset {}",
                new_holder, asset.id
            )));
        }
        self.require_user(new_holder)?;

        Ok(HolderChange {
            asset_id: asset.id,
            expected_holder: asset.current_holder,
            new_holder: *new_holder,
            at: timestamp_now(),
        })
    }

    fn require_user(&self, id: &UserId) -> MarketResult<User> {
        self.storage
            .get_user(id)?
            .ok_or_else(|| MarketError::not_found("User", id))
    }
}

fn authorize_creator(asset: &Asset, editor: &UserId, action: &str) -> MarketResult<()> {
    if asset.creator != *editor {
        log::warn!(
            "User {} attempted to {} asset {} created by {}",
            editor,
            action,
            asset.id,
            asset.creator
        );
        return Err(MarketError::Authorization(format!(
            "Not authorized to {} this asset",
            action
        )));
    }
    Ok(())
}
