use crate::error::{MarketError, MarketResult};
use crate::id::{AssetId, IdKind, ObjectId, RequestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Current time truncated to millisecond precision, the resolution timestamps are stored at
pub fn timestamp_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// A registered marketplace participant.
///
/// Only the identity projection lives here; credentials belong to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

impl User {
    pub fn new(username: &str) -> MarketResult<Self> {
        let username = require_text("username", username)?;
        Ok(Self {
            id: ObjectId::generate(IdKind::User),
            username,
        })
    }
}

/// Lifecycle of an asset. Published is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Draft,
    Published,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Draft => "draft",
            AssetStatus::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(AssetStatus::Draft),
            "published" => Some(AssetStatus::Published),
            _ => None,
        }
    }
}

/// One entry in an asset's trading journey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderRecord {
    pub holder: UserId,
    pub date: DateTime<Utc>,
}

/// A tradable item with a lifecycle and a current holder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub name: String,
    pub description: String,
    pub image: String,
    pub status: AssetStatus,
    pub creator: UserId,
    pub current_holder: UserId,
    /// Append-only record of every holder change
    pub trading_journey: Vec<HolderRecord>,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    /// Build a new draft asset held by its creator. Fields must already be validated.
    pub fn new_draft(creator: UserId, fields: AssetFields) -> Self {
        Self {
            id: ObjectId::generate(IdKind::Asset),
            name: fields.name,
            description: fields.description,
            image: fields.image,
            status: AssetStatus::Draft,
            creator,
            current_holder: creator,
            trading_journey: Vec::new(),
            created_at: timestamp_now(),
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == AssetStatus::Published
    }

    pub fn is_held_by(&self, user: &UserId) -> bool {
        self.current_holder == *user
    }

    /// Record a holder change: the journey grows by one entry and the holder moves
    pub fn reassign_holder(&mut self, new_holder: UserId, at: DateTime<Utc>) {
        self.trading_journey.push(HolderRecord {
            holder: new_holder,
            date: at,
        });
        self.current_holder = new_holder;
    }
}

/// Descriptive fields supplied when creating an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFields {
    pub name: String,
    pub description: String,
    pub image: String,
}

impl AssetFields {
    pub fn new(name: &str, description: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            image: image.to_string(),
        }
    }

    /// Check every field and return the normalized (trimmed) values
    pub fn validate(self) -> MarketResult<Self> {
        Ok(Self {
            name: require_text("name", &self.name)?,
            description: require_text("description", &self.description)?,
            image: require_image(&self.image)?,
        })
    }
}

/// Partial update of an asset's descriptive fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

impl AssetUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.image.is_none()
    }

    pub fn validate(self) -> MarketResult<Self> {
        Ok(Self {
            name: self.name.as_deref().map(|v| require_text("name", v)).transpose()?,
            description: self
                .description
                .as_deref()
                .map(|v| require_text("description", v))
                .transpose()?,
            image: self.image.as_deref().map(require_image).transpose()?,
        })
    }

    /// Apply the update. Ownership fields are never touched.
    pub fn apply_to(self, asset: &mut Asset) {
        if let Some(name) = self.name {
            asset.name = name;
        }
        if let Some(description) = self.description {
            asset.description = description;
        }
        if let Some(image) = self.image {
            asset.image = image;
        }
    }
}

/// An asset together with display projections of the users it references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDetails {
    #[serde(flatten)]
    pub asset: Asset,
    pub creator_profile: User,
    pub holder_profile: User,
}

/// Lifecycle of a purchase request. Accepted and Denied are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Denied,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Denied => "denied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RequestStatus::Pending),
            "accepted" => Some(RequestStatus::Accepted),
            "denied" => Some(RequestStatus::Denied),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

/// Terminal outcome a pending request can be resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Accepted,
    Denied,
}

impl From<Resolution> for RequestStatus {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Accepted => RequestStatus::Accepted,
            Resolution::Denied => RequestStatus::Denied,
        }
    }
}

/// An offer by one user to acquire an asset from its current holder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub id: RequestId,
    pub asset: AssetId,
    pub requester: UserId,
    pub proposed_price: f64,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseRequest {
    /// Build a new pending request. The price must already be validated.
    pub fn new_pending(asset: AssetId, requester: UserId, proposed_price: f64) -> Self {
        let now = timestamp_now();
        Self {
            id: ObjectId::generate(IdKind::Request),
            asset,
            requester,
            proposed_price,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

/// Reject empty or whitespace-only text, returning the trimmed value
pub fn require_text(field: &str, value: &str) -> MarketResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MarketError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Images are referenced by absolute URL
pub fn require_image(value: &str) -> MarketResult<String> {
    let image = require_text("image", value)?;
    match Url::parse(&image) {
        Ok(url) if url.has_host() || url.scheme() == "data" => Ok(image),
        Ok(_) => Err(MarketError::Validation(format!(
            "image must be a valid URL: {}",
            image
        ))),
        Err(e) => Err(MarketError::Validation(format!(
            "image must be a valid URL: {}",
            e
        ))),
    }
}

/// Prices must be positive, finite numbers
pub fn require_price(price: f64) -> MarketResult<f64> {
    if !price.is_finite() || price <= 0.0 {
        return Err(MarketError::Validation(format!(
            "price must be a positive number, got {}",
            price
        )));
    }
    Ok(price)
}
