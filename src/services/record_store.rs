//! Relational-store contract and the SQLite implementation.
//!
//! One table per entity kind (`profile_images`, `listing_images`), each with
//! a UNIQUE constraint on its identity columns. That constraint is the sole
//! arbiter of concurrent creates: a lost race surfaces as `DuplicateKey`.

use crate::models::{
    image::{ImageIdentity, ImageRecord},
    listing_image::ListingImage,
    profile_image::ProfileImage,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("duplicate record for {0}")]
    DuplicateKey(ImageIdentity),
    #[error("no record for {0}")]
    NotFound(ImageIdentity),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RecordResult<T> = Result<T, RecordStoreError>;

/// Contract the consistency protocol needs from the relational store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up the record owned by `identity`, if any.
    async fn find(&self, identity: ImageIdentity) -> RecordResult<Option<ImageRecord>>;

    /// Create the record for `identity`. Fails `DuplicateKey` if one exists.
    async fn insert(&self, identity: ImageIdentity, storage_key: &str)
        -> RecordResult<ImageRecord>;

    /// Point an existing record at a new storage key.
    async fn update_key(
        &self,
        identity: ImageIdentity,
        storage_key: &str,
    ) -> RecordResult<ImageRecord>;

    /// Remove the record for `identity`. Fails `NotFound` if absent.
    async fn delete(&self, identity: ImageIdentity) -> RecordResult<()>;
}

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteRecordStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find(&self, identity: ImageIdentity) -> RecordResult<Option<ImageRecord>> {
        match identity {
            ImageIdentity::Profile { user_id } => {
                let row = sqlx::query_as::<_, ProfileImage>(
                    "SELECT id, user_id, storage_key, created_at, updated_at
                     FROM profile_images WHERE user_id = ?",
                )
                .bind(user_id)
                .fetch_optional(&*self.db)
                .await?;
                Ok(row.map(ImageRecord::from))
            }
            ImageIdentity::Listing {
                listing_id,
                position,
            } => {
                let row = sqlx::query_as::<_, ListingImage>(
                    "SELECT id, listing_id, position, storage_key, created_at, updated_at
                     FROM listing_images WHERE listing_id = ? AND position = ?",
                )
                .bind(listing_id)
                .bind(position)
                .fetch_optional(&*self.db)
                .await?;
                Ok(row.map(ImageRecord::from))
            }
        }
    }

    async fn insert(
        &self,
        identity: ImageIdentity,
        storage_key: &str,
    ) -> RecordResult<ImageRecord> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let result = match identity {
            ImageIdentity::Profile { user_id } => sqlx::query(
                "INSERT INTO profile_images (id, user_id, storage_key, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(user_id)
            .bind(storage_key)
            .bind(now)
            .bind(now)
            .execute(&*self.db)
            .await,
            ImageIdentity::Listing {
                listing_id,
                position,
            } => sqlx::query(
                "INSERT INTO listing_images
                     (id, listing_id, position, storage_key, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(listing_id)
            .bind(position)
            .bind(storage_key)
            .bind(now)
            .bind(now)
            .execute(&*self.db)
            .await,
        };

        match result {
            Ok(_) => Ok(ImageRecord {
                id,
                identity,
                storage_key: storage_key.to_string(),
                created_at: now,
                updated_at: now,
            }),
            Err(err) if is_unique_violation(&err) => {
                Err(RecordStoreError::DuplicateKey(identity))
            }
            Err(err) => Err(RecordStoreError::Sqlx(err)),
        }
    }

    async fn update_key(
        &self,
        identity: ImageIdentity,
        storage_key: &str,
    ) -> RecordResult<ImageRecord> {
        let now = Utc::now();

        let record = match identity {
            ImageIdentity::Profile { user_id } => sqlx::query_as::<_, ProfileImage>(
                "UPDATE profile_images SET storage_key = ?, updated_at = ?
                 WHERE user_id = ?
                 RETURNING id, user_id, storage_key, created_at, updated_at",
            )
            .bind(storage_key)
            .bind(now)
            .bind(user_id)
            .fetch_optional(&*self.db)
            .await?
            .map(ImageRecord::from),
            ImageIdentity::Listing {
                listing_id,
                position,
            } => sqlx::query_as::<_, ListingImage>(
                "UPDATE listing_images SET storage_key = ?, updated_at = ?
                 WHERE listing_id = ? AND position = ?
                 RETURNING id, listing_id, position, storage_key, created_at, updated_at",
            )
            .bind(storage_key)
            .bind(now)
            .bind(listing_id)
            .bind(position)
            .fetch_optional(&*self.db)
            .await?
            .map(ImageRecord::from),
        };

        record.ok_or(RecordStoreError::NotFound(identity))
    }

    async fn delete(&self, identity: ImageIdentity) -> RecordResult<()> {
        let result = match identity {
            ImageIdentity::Profile { user_id } => {
                sqlx::query("DELETE FROM profile_images WHERE user_id = ?")
                    .bind(user_id)
                    .execute(&*self.db)
                    .await?
            }
            ImageIdentity::Listing {
                listing_id,
                position,
            } => sqlx::query("DELETE FROM listing_images WHERE listing_id = ? AND position = ?")
                .bind(listing_id)
                .bind(position)
                .execute(&*self.db)
                .await?,
        };

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::NotFound(identity));
        }
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Build an in-memory pool with the schema applied, for tests.
#[cfg(test)]
pub(crate) async fn memory_pool() -> Arc<SqlitePool> {
    use sqlx::sqlite::SqlitePoolOptions;

    // A single connection, or each pool checkout would see its own empty DB.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let schema = include_str!("../../migrations/0001_init.sql");
    for stmt in schema.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(stmt).execute(&pool).await.unwrap();
    }

    Arc::new(pool)
}
