#![cfg(feature = "sqlite")]

use crate::storage_traits::{
    Acceptance, AcceptanceOutcome, AssetFilter, AssetStore, MarketStorage, RequestFilter,
    RequestStore, UserStore,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    },
    Row,
};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::runtime::Runtime;
use tradepost_core::error::StorageError;
use tradepost_core::id::{AssetId, ObjectId, RequestId, UserId};
use tradepost_core::objects::{
    Asset, AssetStatus, HolderRecord, PurchaseRequest, RequestStatus, User,
};

/// Default size of the connection pool for file-backed databases
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQL query constants to avoid repetition
mod sql {
    pub const CREATE_USERS_TABLE: &str = r#"
        CREATE TABLE IF NOT EXISTS users (
            id BLOB PRIMARY KEY,
            username TEXT NOT NULL UNIQUE
        )
    "#;

    pub const CREATE_ASSETS_TABLE: &str = r#"
        CREATE TABLE IF NOT EXISTS assets (
            id BLOB PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            image TEXT NOT NULL,
            status TEXT NOT NULL,
            creator BLOB NOT NULL REFERENCES users(id),
            current_holder BLOB NOT NULL REFERENCES users(id),
            created_at INTEGER NOT NULL
        )
    "#;

    pub const CREATE_JOURNEY_TABLE: &str = r#"
        CREATE TABLE IF NOT EXISTS trading_journey (
            asset_id BLOB NOT NULL REFERENCES assets(id),
            position INTEGER NOT NULL,
            holder BLOB NOT NULL REFERENCES users(id),
            date INTEGER NOT NULL,
            PRIMARY KEY (asset_id, position)
        )
    "#;

    pub const CREATE_REQUESTS_TABLE: &str = r#"
        CREATE TABLE IF NOT EXISTS requests (
            id BLOB PRIMARY KEY,
            asset_id BLOB NOT NULL REFERENCES assets(id),
            requester BLOB NOT NULL REFERENCES users(id),
            proposed_price REAL NOT NULL CHECK (proposed_price > 0),
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
    "#;

    pub const CREATE_INDEXES: [&str; 4] = [
        "CREATE INDEX IF NOT EXISTS idx_assets_creator ON assets(creator)",
        "CREATE INDEX IF NOT EXISTS idx_assets_status ON assets(status)",
        "CREATE INDEX IF NOT EXISTS idx_requests_requester ON requests(requester)",
        "CREATE INDEX IF NOT EXISTS idx_requests_asset ON requests(asset_id)",
    ];

    pub const INSERT_USER: &str = "INSERT INTO users (id, username) VALUES (?, ?)";
    pub const GET_USER: &str = "SELECT id, username FROM users WHERE id = ?";
    pub const GET_USER_BY_NAME: &str = "SELECT id, username FROM users WHERE username = ?";

    pub const INSERT_ASSET: &str = r#"
        INSERT INTO assets (id, name, description, image, status, creator, current_holder, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    "#;

    pub const GET_ASSET: &str = r#"
        SELECT id, name, description, image, status, creator, current_holder, created_at
        FROM assets WHERE id = ?
    "#;

    pub const ASSETS_BY_CREATOR: &str = r#"
        SELECT id, name, description, image, status, creator, current_holder, created_at
        FROM assets WHERE creator = ? ORDER BY created_at, rowid
    "#;

    pub const ASSETS_BY_HOLDER: &str = r#"
        SELECT id, name, description, image, status, creator, current_holder, created_at
        FROM assets WHERE current_holder = ? ORDER BY created_at, rowid
    "#;

    pub const ASSETS_BY_STATUS: &str = r#"
        SELECT id, name, description, image, status, creator, current_holder, created_at
        FROM assets WHERE status = ? ORDER BY created_at, rowid
    "#;

    pub const UPDATE_ASSET_DETAILS: &str = r#"
        UPDATE assets SET name = ?, description = ?, image = ?
        WHERE id = ?
    "#;

    pub const MARK_PUBLISHED: &str = "UPDATE assets SET status = 'published' WHERE id = ?";

    pub const MOVE_HOLDER: &str = r#"
        UPDATE assets SET current_holder = ?
        WHERE id = ? AND current_holder = ? AND current_holder <> ?
    "#;

    pub const GET_JOURNEY: &str = r#"
        SELECT holder, date FROM trading_journey
        WHERE asset_id = ? ORDER BY position
    "#;

    pub const APPEND_JOURNEY: &str = r#"
        INSERT INTO trading_journey (asset_id, position, holder, date)
        SELECT ?, COALESCE(MAX(position) + 1, 0), ?, ?
        FROM trading_journey WHERE asset_id = ?
    "#;

    pub const INSERT_REQUEST: &str = r#"
        INSERT INTO requests (id, asset_id, requester, proposed_price, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
    "#;

    pub const GET_REQUEST: &str = r#"
        SELECT id, asset_id, requester, proposed_price, status, created_at, updated_at
        FROM requests WHERE id = ?
    "#;

    pub const REQUESTS_BY_REQUESTER: &str = r#"
        SELECT id, asset_id, requester, proposed_price, status, created_at, updated_at
        FROM requests WHERE requester = ? ORDER BY created_at, rowid
    "#;

    pub const REQUESTS_BY_ASSET: &str = r#"
        SELECT id, asset_id, requester, proposed_price, status, created_at, updated_at
        FROM requests WHERE asset_id = ? ORDER BY created_at, rowid
    "#;

    pub const UPDATE_PENDING_PRICE: &str = r#"
        UPDATE requests SET proposed_price = ?, updated_at = ?
        WHERE id = ? AND status = 'pending'
    "#;

    pub const RESOLVE_PENDING: &str = r#"
        UPDATE requests SET status = ?, updated_at = ?
        WHERE id = ? AND status = 'pending'
    "#;
}

/// A SQLite-based implementation of the marketplace storage using sqlx.
///
/// The storage traits are synchronous; every call drives its query on a runtime owned by
/// the storage, so callers never need to be async themselves.
pub struct SqliteStorage {
    pool: SqlitePool,
    rt: Arc<Runtime>,
    db_path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Opens (creating if necessary) a file-backed database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open(Some(path.as_ref()), DEFAULT_MAX_CONNECTIONS)
    }

    /// Opens a private in-memory database
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::open(None, 1)
    }

    /// Opens a database at `path`, or in memory when no path is given.
    ///
    /// An in-memory database lives inside a single connection, so the pool is pinned to
    /// exactly one connection that is never recycled.
    pub fn open(path: Option<&Path>, max_connections: u32) -> Result<Self, StorageError> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("Failed to create storage runtime")?;
        let rt = Arc::new(rt);

        let options = match path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            None => SqliteConnectOptions::from_str("sqlite::memory:")
                .context("Invalid in-memory database URL")?,
        }
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

        let pool_options = match path {
            Some(_) => SqlitePoolOptions::new().max_connections(max_connections.max(1)),
            None => SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        };

        let pool = rt
            .block_on(pool_options.connect_with(options))
            .context("Failed to connect to database")?;

        rt.block_on(Self::initialize_schema(&pool))
            .context("Failed to initialize database schema")?;

        log::debug!(
            "Opened marketplace storage at {}",
            path.map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string())
        );

        Ok(Self {
            pool,
            rt,
            db_path: path.map(Path::to_path_buf),
        })
    }

    /// Creates the necessary tables in the database
    async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(sql::CREATE_USERS_TABLE).execute(pool).await?;
        sqlx::query(sql::CREATE_ASSETS_TABLE).execute(pool).await?;
        sqlx::query(sql::CREATE_JOURNEY_TABLE).execute(pool).await?;
        sqlx::query(sql::CREATE_REQUESTS_TABLE).execute(pool).await?;

        for index in sql::CREATE_INDEXES {
            sqlx::query(index).execute(pool).await?;
        }

        Ok(())
    }

    /// Path of the backing file, `None` for in-memory databases
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Close every pooled connection, flushing the database to disk
    pub fn close(&self) {
        self.rt.block_on(self.pool.close());
    }

    async fn load_journey(
        pool: &SqlitePool,
        asset_id: &AssetId,
    ) -> Result<Vec<HolderRecord>, StorageError> {
        let rows = sqlx::query(sql::GET_JOURNEY)
            .bind(asset_id.as_ref())
            .fetch_all(pool)
            .await
            .with_context(|| format!("Failed to load trading journey for asset {}", asset_id))?;

        rows.iter()
            .map(|row| -> Result<HolderRecord, StorageError> {
                Ok(HolderRecord {
                    holder: decode_id(row, "holder")?,
                    date: decode_time(row, "date")?,
                })
            })
            .collect()
    }

    async fn load_assets(
        pool: &SqlitePool,
        rows: Vec<SqliteRow>,
    ) -> Result<Vec<Asset>, StorageError> {
        let mut assets = Vec::with_capacity(rows.len());
        for row in rows {
            let id = decode_id(&row, "id")?;
            let journey = Self::load_journey(pool, &id).await?;
            assets.push(row_to_asset(&row, journey)?);
        }
        Ok(assets)
    }
}

fn decode_id(row: &SqliteRow, column: &str) -> Result<ObjectId, StorageError> {
    let bytes: Vec<u8> = row.try_get(column)?;
    ObjectId::try_from(bytes.as_slice()).map_err(|e| {
        StorageError::Serialization(format!("Invalid id in column {}: {}", column, e))
    })
}

fn decode_time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StorageError> {
    let millis: i64 = row.try_get(column)?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StorageError::Serialization(format!("Invalid timestamp in column {}: {}", column, millis))
    })
}

fn row_to_user(row: &SqliteRow) -> Result<User, StorageError> {
    Ok(User {
        id: decode_id(row, "id")?,
        username: row.try_get("username")?,
    })
}

fn row_to_asset(row: &SqliteRow, trading_journey: Vec<HolderRecord>) -> Result<Asset, StorageError> {
    let status: String = row.try_get("status")?;
    let status = AssetStatus::parse(&status)
        .ok_or_else(|| StorageError::Serialization(format!("Unknown asset status: {}", status)))?;

    Ok(Asset {
        id: decode_id(row, "id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        image: row.try_get("image")?,
        status,
        creator: decode_id(row, "creator")?,
        current_holder: decode_id(row, "current_holder")?,
        trading_journey,
        created_at: decode_time(row, "created_at")?,
    })
}

fn row_to_request(row: &SqliteRow) -> Result<PurchaseRequest, StorageError> {
    let status: String = row.try_get("status")?;
    let status = RequestStatus::parse(&status).ok_or_else(|| {
        StorageError::Serialization(format!("Unknown request status: {}", status))
    })?;

    Ok(PurchaseRequest {
        id: decode_id(row, "id")?,
        asset: decode_id(row, "asset_id")?,
        requester: decode_id(row, "requester")?,
        proposed_price: row.try_get("proposed_price")?,
        status,
        created_at: decode_time(row, "created_at")?,
        updated_at: decode_time(row, "updated_at")?,
    })
}

impl UserStore for SqliteStorage {
    fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        self.rt.block_on(async {
            sqlx::query(sql::INSERT_USER)
                .bind(user.id.as_ref())
                .bind(&user.username)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn get_user(&self, id: &UserId) -> Result<Option<User>, StorageError> {
        self.rt.block_on(async {
            let row = sqlx::query(sql::GET_USER)
                .bind(id.as_ref())
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to fetch user {}", id))?;

            row.as_ref().map(row_to_user).transpose()
        })
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        self.rt.block_on(async {
            let row = sqlx::query(sql::GET_USER_BY_NAME)
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to fetch user named {}", username))?;

            row.as_ref().map(row_to_user).transpose()
        })
    }
}

impl AssetStore for SqliteStorage {
    fn insert_asset(&self, asset: &Asset) -> Result<(), StorageError> {
        self.rt.block_on(async {
            let mut tx = self
                .pool
                .begin()
                .await
                .with_context(|| "Failed to start database transaction")?;

            sqlx::query(sql::INSERT_ASSET)
                .bind(asset.id.as_ref())
                .bind(&asset.name)
                .bind(&asset.description)
                .bind(&asset.image)
                .bind(asset.status.as_str())
                .bind(asset.creator.as_ref())
                .bind(asset.current_holder.as_ref())
                .bind(asset.created_at.timestamp_millis())
                .execute(&mut *tx)
                .await?;

            for (position, record) in asset.trading_journey.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO trading_journey (asset_id, position, holder, date) VALUES (?, ?, ?, ?)",
                )
                .bind(asset.id.as_ref())
                .bind(position as i64)
                .bind(record.holder.as_ref())
                .bind(record.date.timestamp_millis())
                .execute(&mut *tx)
                .await?;
            }

            tx.commit()
                .await
                .with_context(|| format!("Failed to commit asset {}", asset.id))?;

            Ok(())
        })
    }

    fn get_asset(&self, id: &AssetId) -> Result<Option<Asset>, StorageError> {
        self.rt.block_on(async {
            let row = sqlx::query(sql::GET_ASSET)
                .bind(id.as_ref())
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to fetch asset {}", id))?;

            let Some(row) = row else {
                return Ok(None);
            };

            let journey = Self::load_journey(&self.pool, id).await?;
            row_to_asset(&row, journey).map(Some)
        })
    }

    fn update_asset_details(&self, asset: &Asset) -> Result<(), StorageError> {
        self.rt.block_on(async {
            let result = sqlx::query(sql::UPDATE_ASSET_DETAILS)
                .bind(&asset.name)
                .bind(&asset.description)
                .bind(&asset.image)
                .bind(asset.id.as_ref())
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to update asset {}", asset.id))?;

            if result.rows_affected() == 0 {
                return Err(StorageError::NotFound(format!("Asset {} not found", asset.id)));
            }
            Ok(())
        })
    }

    fn mark_published(&self, id: &AssetId) -> Result<(), StorageError> {
        self.rt.block_on(async {
            let result = sqlx::query(sql::MARK_PUBLISHED)
                .bind(id.as_ref())
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to publish asset {}", id))?;

            if result.rows_affected() == 0 {
                return Err(StorageError::NotFound(format!("Asset {} not found", id)));
            }
            Ok(())
        })
    }

    fn find_assets(&self, filter: AssetFilter) -> Result<Vec<Asset>, StorageError> {
        self.rt.block_on(async {
            let query = match filter {
                AssetFilter::Creator(user) => {
                    sqlx::query(sql::ASSETS_BY_CREATOR).bind(user.as_bytes().to_vec())
                }
                AssetFilter::Holder(user) => {
                    sqlx::query(sql::ASSETS_BY_HOLDER).bind(user.as_bytes().to_vec())
                }
                AssetFilter::Status(status) => {
                    sqlx::query(sql::ASSETS_BY_STATUS).bind(status.as_str())
                }
            };

            let rows = query
                .fetch_all(&self.pool)
                .await
                .with_context(|| format!("Failed to list assets ({:?})", filter))?;

            Self::load_assets(&self.pool, rows).await
        })
    }
}

impl RequestStore for SqliteStorage {
    fn insert_request(&self, request: &PurchaseRequest) -> Result<(), StorageError> {
        self.rt.block_on(async {
            sqlx::query(sql::INSERT_REQUEST)
                .bind(request.id.as_ref())
                .bind(request.asset.as_ref())
                .bind(request.requester.as_ref())
                .bind(request.proposed_price)
                .bind(request.status.as_str())
                .bind(request.created_at.timestamp_millis())
                .bind(request.updated_at.timestamp_millis())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn get_request(&self, id: &RequestId) -> Result<Option<PurchaseRequest>, StorageError> {
        self.rt.block_on(async {
            let row = sqlx::query(sql::GET_REQUEST)
                .bind(id.as_ref())
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to fetch request {}", id))?;

            row.as_ref().map(row_to_request).transpose()
        })
    }

    fn find_requests(&self, filter: RequestFilter) -> Result<Vec<PurchaseRequest>, StorageError> {
        self.rt.block_on(async {
            let query = match filter {
                RequestFilter::Requester(user) => {
                    sqlx::query(sql::REQUESTS_BY_REQUESTER).bind(user.as_bytes().to_vec())
                }
                RequestFilter::Asset(asset) => {
                    sqlx::query(sql::REQUESTS_BY_ASSET).bind(asset.as_bytes().to_vec())
                }
            };

            let rows = query
                .fetch_all(&self.pool)
                .await
                .with_context(|| format!("Failed to list requests ({:?})", filter))?;

            rows.iter().map(row_to_request).collect()
        })
    }

    fn update_pending_price(
        &self,
        id: &RequestId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.rt.block_on(async {
            let result = sqlx::query(sql::UPDATE_PENDING_PRICE)
                .bind(price)
                .bind(at.timestamp_millis())
                .bind(id.as_ref())
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to update price of request {}", id))?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn resolve_pending(
        &self,
        id: &RequestId,
        status: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.rt.block_on(async {
            let result = sqlx::query(sql::RESOLVE_PENDING)
                .bind(status.as_str())
                .bind(at.timestamp_millis())
                .bind(id.as_ref())
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to resolve request {}", id))?;

            Ok(result.rows_affected() == 1)
        })
    }
}

impl MarketStorage for SqliteStorage {
    fn commit_acceptance(
        &self,
        acceptance: &Acceptance,
    ) -> Result<AcceptanceOutcome, StorageError> {
        let change = &acceptance.holder_change;
        let transition = &acceptance.transition;

        self.rt.block_on(async {
            let mut tx = self
                .pool
                .begin()
                .await
                .with_context(|| "Failed to start acceptance transaction")?;

            let resolved = sqlx::query(sql::RESOLVE_PENDING)
                .bind(transition.to.as_str())
                .bind(transition.at.timestamp_millis())
                .bind(transition.request_id.as_ref())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to resolve request {}", transition.request_id))?;

            if resolved.rows_affected() != 1 {
                tx.rollback()
                    .await
                    .with_context(|| "Failed to roll back acceptance")?;
                return Ok(AcceptanceOutcome::RequestNotPending);
            }

            let moved = sqlx::query(sql::MOVE_HOLDER)
                .bind(change.new_holder.as_ref())
                .bind(change.asset_id.as_ref())
                .bind(change.expected_holder.as_ref())
                .bind(change.new_holder.as_ref())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to move holder of asset {}", change.asset_id))?;

            if moved.rows_affected() != 1 {
                tx.rollback()
                    .await
                    .with_context(|| "Failed to roll back acceptance")?;
                return Ok(AcceptanceOutcome::HolderChanged);
            }

            sqlx::query(sql::APPEND_JOURNEY)
                .bind(change.asset_id.as_ref())
                .bind(change.new_holder.as_ref())
                .bind(change.at.timestamp_millis())
                .bind(change.asset_id.as_ref())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to extend journey of asset {}", change.asset_id))?;

            tx.commit()
                .await
                .with_context(|| "Failed to commit acceptance")?;

            Ok(AcceptanceOutcome::Committed)
        })
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_traits::{HolderChange, StatusTransition};
    use tempfile::tempdir;
    use tradepost_core::objects::{timestamp_now, AssetFields};

    fn user(storage: &SqliteStorage, name: &str) -> User {
        let user = User::new(name).unwrap();
        storage.insert_user(&user).unwrap();
        user
    }

    fn asset(storage: &SqliteStorage, creator: &User, name: &str) -> Asset {
        let asset = Asset::new_draft(
            creator.id,
            AssetFields::new(name, "A test asset", "https://img.example.com/a.png"),
        );
        storage.insert_asset(&asset).unwrap();
        asset
    }

    fn acceptance(asset: &Asset, request: &PurchaseRequest, expected: UserId) -> Acceptance {
        let at = timestamp_now();
        Acceptance {
            holder_change: HolderChange {
                asset_id: asset.id,
                expected_holder: expected,
                new_holder: request.requester,
                at,
            },
            transition: StatusTransition {
                request_id: request.id,
                to: RequestStatus::Accepted,
                at,
            },
        }
    }

    #[test]
    fn test_user_operations() {
        let storage = SqliteStorage::in_memory().unwrap();
        let alice = user(&storage, "alice");

        assert_eq!(storage.get_user(&alice.id).unwrap(), Some(alice.clone()));
        assert_eq!(
            storage.find_user_by_username("alice").unwrap(),
            Some(alice.clone())
        );
        assert!(storage.find_user_by_username("bob").unwrap().is_none());

        let duplicate = User::new("alice").unwrap();
        let err = storage.insert_user(&duplicate).unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)), "got {:?}", err);
    }

    #[test]
    fn test_asset_storage_operations() {
        let storage = SqliteStorage::in_memory().unwrap();
        let alice = user(&storage, "alice");
        let mut stored = asset(&storage, &alice, "Sunset");

        let retrieved = storage.get_asset(&stored.id).unwrap().unwrap();
        assert_eq!(retrieved, stored);

        stored.name = "Dawn".to_string();
        storage.update_asset_details(&stored).unwrap();
        storage.mark_published(&stored.id).unwrap();
        storage.mark_published(&stored.id).unwrap();

        let retrieved = storage.get_asset(&stored.id).unwrap().unwrap();
        assert_eq!(retrieved.name, "Dawn");
        assert_eq!(retrieved.status, AssetStatus::Published);
        assert_eq!(retrieved.creator, alice.id);

        // A stale copy carrying the draft status cannot unpublish
        stored.description = "Edited".to_string();
        storage.update_asset_details(&stored).unwrap();
        let retrieved = storage.get_asset(&stored.id).unwrap().unwrap();
        assert_eq!(retrieved.status, AssetStatus::Published);
        assert_eq!(retrieved.description, "Edited");

        let missing = Asset::new_draft(
            alice.id,
            AssetFields::new("Ghost", "never stored", "https://img.example.com/g.png"),
        );
        assert!(matches!(
            storage.update_asset_details(&missing),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.mark_published(&missing.id),
            Err(StorageError::NotFound(_))
        ));
        assert!(storage.get_asset(&missing.id).unwrap().is_none());
    }

    #[test]
    fn test_update_details_cannot_move_holder() {
        let storage = SqliteStorage::in_memory().unwrap();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");
        let mut stored = asset(&storage, &alice, "Sunset");

        stored.current_holder = bob.id;
        stored.creator = bob.id;
        storage.update_asset_details(&stored).unwrap();

        let retrieved = storage.get_asset(&stored.id).unwrap().unwrap();
        assert_eq!(retrieved.creator, alice.id);
        assert_eq!(retrieved.current_holder, alice.id);
    }

    #[test]
    fn test_find_assets_in_creation_order() {
        let storage = SqliteStorage::in_memory().unwrap();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");

        let first = asset(&storage, &alice, "one");
        let _other = asset(&storage, &bob, "two");
        let third = asset(&storage, &alice, "three");
        storage.mark_published(&third.id).unwrap();

        let by_alice: Vec<_> = storage
            .find_assets(AssetFilter::Creator(alice.id))
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(by_alice, vec![first.id, third.id]);

        let published = storage
            .find_assets(AssetFilter::Status(AssetStatus::Published))
            .unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, third.id);

        assert_eq!(
            storage.find_assets(AssetFilter::Holder(bob.id)).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_request_conditional_updates() {
        let storage = SqliteStorage::in_memory().unwrap();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");
        let stored = asset(&storage, &alice, "Sunset");

        let request = PurchaseRequest::new_pending(stored.id, bob.id, 100.0);
        storage.insert_request(&request).unwrap();
        assert_eq!(storage.get_request(&request.id).unwrap(), Some(request.clone()));

        assert!(storage
            .update_pending_price(&request.id, 150.0, timestamp_now())
            .unwrap());
        assert_eq!(
            storage.get_request(&request.id).unwrap().unwrap().proposed_price,
            150.0
        );

        assert!(storage
            .resolve_pending(&request.id, RequestStatus::Denied, timestamp_now())
            .unwrap());

        // Terminal requests reject every further conditional write
        assert!(!storage
            .update_pending_price(&request.id, 200.0, timestamp_now())
            .unwrap());
        assert!(!storage
            .resolve_pending(&request.id, RequestStatus::Accepted, timestamp_now())
            .unwrap());

        let stored_request = storage.get_request(&request.id).unwrap().unwrap();
        assert_eq!(stored_request.status, RequestStatus::Denied);
        assert_eq!(stored_request.proposed_price, 150.0);

        let by_bob = storage.find_requests(RequestFilter::Requester(bob.id)).unwrap();
        assert_eq!(by_bob.len(), 1);
        let on_asset = storage.find_requests(RequestFilter::Asset(stored.id)).unwrap();
        assert_eq!(on_asset.len(), 1);
        assert!(storage
            .find_requests(RequestFilter::Requester(alice.id))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_commit_acceptance() {
        let storage = SqliteStorage::in_memory().unwrap();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");
        let stored = asset(&storage, &alice, "Sunset");
        let request = PurchaseRequest::new_pending(stored.id, bob.id, 100.0);
        storage.insert_request(&request).unwrap();

        let plan = acceptance(&stored, &request, alice.id);
        assert_eq!(
            storage.commit_acceptance(&plan).unwrap(),
            AcceptanceOutcome::Committed
        );

        let moved = storage.get_asset(&stored.id).unwrap().unwrap();
        assert_eq!(moved.current_holder, bob.id);
        assert_eq!(moved.creator, alice.id);
        assert_eq!(
            moved.trading_journey,
            vec![HolderRecord {
                holder: bob.id,
                date: plan.holder_change.at
            }]
        );
        assert_eq!(
            storage.get_request(&request.id).unwrap().unwrap().status,
            RequestStatus::Accepted
        );

        // Replaying the same acceptance changes nothing
        assert_eq!(
            storage.commit_acceptance(&plan).unwrap(),
            AcceptanceOutcome::RequestNotPending
        );
        assert_eq!(
            storage.get_asset(&stored.id).unwrap().unwrap().trading_journey.len(),
            1
        );
    }

    #[test]
    fn test_commit_acceptance_rolls_back_on_holder_mismatch() {
        let storage = SqliteStorage::in_memory().unwrap();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");
        let carol = user(&storage, "carol");
        let stored = asset(&storage, &alice, "Sunset");
        let request = PurchaseRequest::new_pending(stored.id, bob.id, 100.0);
        storage.insert_request(&request).unwrap();

        // Planned against a holder the asset does not have
        let plan = acceptance(&stored, &request, carol.id);
        assert_eq!(
            storage.commit_acceptance(&plan).unwrap(),
            AcceptanceOutcome::HolderChanged
        );

        // The request transition ran first inside the transaction and must be undone
        assert_eq!(
            storage.get_request(&request.id).unwrap().unwrap().status,
            RequestStatus::Pending
        );
        let unchanged = storage.get_asset(&stored.id).unwrap().unwrap();
        assert_eq!(unchanged.current_holder, alice.id);
        assert!(unchanged.trading_journey.is_empty());
    }

    #[test]
    fn test_commit_acceptance_rejects_transfer_to_current_holder() {
        let storage = SqliteStorage::in_memory().unwrap();
        let alice = user(&storage, "alice");
        let stored = asset(&storage, &alice, "Sunset");
        let request = PurchaseRequest::new_pending(stored.id, alice.id, 100.0);
        storage.insert_request(&request).unwrap();

        let plan = acceptance(&stored, &request, alice.id);
        assert_eq!(
            storage.commit_acceptance(&plan).unwrap(),
            AcceptanceOutcome::HolderChanged
        );

        assert_eq!(
            storage.get_request(&request.id).unwrap().unwrap().status,
            RequestStatus::Pending
        );
        let unchanged = storage.get_asset(&stored.id).unwrap().unwrap();
        assert_eq!(unchanged.current_holder, alice.id);
        assert!(unchanged.trading_journey.is_empty());
    }

    #[test]
    fn test_journey_grows_across_transfers() {
        let storage = SqliteStorage::in_memory().unwrap();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");
        let carol = user(&storage, "carol");
        let stored = asset(&storage, &alice, "Sunset");

        let first = PurchaseRequest::new_pending(stored.id, bob.id, 100.0);
        storage.insert_request(&first).unwrap();
        storage
            .commit_acceptance(&acceptance(&stored, &first, alice.id))
            .unwrap();

        let second = PurchaseRequest::new_pending(stored.id, carol.id, 120.0);
        storage.insert_request(&second).unwrap();
        storage
            .commit_acceptance(&acceptance(&stored, &second, bob.id))
            .unwrap();

        let holders: Vec<_> = storage
            .get_asset(&stored.id)
            .unwrap()
            .unwrap()
            .trading_journey
            .into_iter()
            .map(|record| record.holder)
            .collect();
        assert_eq!(holders, vec![bob.id, carol.id]);
    }

    #[test]
    fn test_file_storage_persists_across_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("market.db");

        let storage = SqliteStorage::new(&db_path).unwrap();
        assert_eq!(storage.db_path(), Some(db_path.as_path()));
        let alice = user(&storage, "alice");
        let stored = asset(&storage, &alice, "Sunset");
        storage.close();
        drop(storage);

        let reopened = SqliteStorage::new(&db_path).unwrap();
        assert_eq!(reopened.get_user(&alice.id).unwrap(), Some(alice));
        assert_eq!(reopened.get_asset(&stored.id).unwrap(), Some(stored));
    }
}
