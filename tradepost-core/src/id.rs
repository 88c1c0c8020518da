use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

// ObjectId uniquely identifies a user, asset or purchase request.
// It is a 32 byte identifier derived by hashing a kind tag together with creation seeds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId([u8; 32]);

/// Identifier of a registered user
pub type UserId = ObjectId;

/// Identifier of an asset
pub type AssetId = ObjectId;

/// Identifier of a purchase request
pub type RequestId = ObjectId;

/// The kind of record an identifier is minted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    User,
    Asset,
    Request,
}

impl IdKind {
    fn tag(&self) -> &'static [u8] {
        match self {
            IdKind::User => b"user",
            IdKind::Asset => b"asset",
            IdKind::Request => b"request",
        }
    }
}

/// Errors produced when parsing an identifier from text or raw bytes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdParseError {
    #[error("Invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Expected 32 bytes, got {0}")]
    Length(usize),
}

static MINT_COUNTER: AtomicU64 = AtomicU64::new(0);

impl Deref for ObjectId {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl ObjectId {
    pub fn new(uid: [u8; 32]) -> Self {
        ObjectId(uid)
    }

    /// Deterministically derive an identifier from a kind and a list of seeds
    pub fn derive(kind: IdKind, seeds: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();

        // Domain separator
        hasher.update(b"TRADEPOST_Object");
        hasher.update(kind.tag());

        for seed in seeds {
            hasher.update((seed.len() as u64).to_le_bytes());
            hasher.update(seed);
        }

        ObjectId(hasher.finalize().into())
    }

    /// Mint a fresh identifier for a new record.
    ///
    /// Seeds combine the wall clock with a process-wide counter so two ids minted
    /// within the same clock tick still differ.
    pub fn generate(kind: IdKind) -> Self {
        let now = chrono::Utc::now();
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros());
        let counter = MINT_COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();

        ObjectId::derive(
            kind,
            &[
                &nanos.to_le_bytes(),
                &counter.to_le_bytes(),
                &pid.to_le_bytes(),
            ],
        )
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self, IdParseError> {
        let bytes = hex::decode(value)?;
        ObjectId::try_from(bytes.as_slice())
    }
}

impl TryFrom<&[u8]> for ObjectId {
    type Error = IdParseError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdParseError::Length(bytes.len()))?;
        Ok(ObjectId(array))
    }
}

impl TryFrom<String> for ObjectId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ObjectId::from_hex(&value)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_hex()
    }
}

impl FromStr for ObjectId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectId::from_hex(s)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are plenty to tell ids apart in logs
        write!(f, "ObjectId({}..)", hex::encode(&self.0[..8]))
    }
}
