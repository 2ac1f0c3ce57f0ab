//! Represents the image attached to a user profile.

use crate::models::image::{ImageIdentity, ImageRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row of `profile_images`.
///
/// `user_id` is UNIQUE: a profile has at most one image at a time.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ProfileImage {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// The owning user.
    pub user_id: i64,

    /// Content-addressed object-store key of the current blob.
    pub storage_key: String,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the storage key last changed.
    pub updated_at: DateTime<Utc>,
}

impl From<ProfileImage> for ImageRecord {
    fn from(row: ProfileImage) -> Self {
        ImageRecord {
            id: row.id,
            identity: ImageIdentity::Profile {
                user_id: row.user_id,
            },
            storage_key: row.storage_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
