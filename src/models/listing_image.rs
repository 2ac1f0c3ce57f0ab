//! Represents one image slot of a listing.

use crate::models::image::{ImageIdentity, ImageRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row of `listing_images`.
///
/// `(listing_id, position)` is UNIQUE: each position slot of a listing holds
/// at most one image. The position identifies the slot and never changes for
/// an existing row.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ListingImage {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// The owning listing.
    pub listing_id: i64,

    /// Slot index within the listing's gallery.
    pub position: i64,

    /// Content-addressed object-store key of the current blob.
    pub storage_key: String,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the storage key last changed.
    pub updated_at: DateTime<Utc>,
}

impl From<ListingImage> for ImageRecord {
    fn from(row: ListingImage) -> Self {
        ImageRecord {
            id: row.id,
            identity: ImageIdentity::Listing {
                listing_id: row.listing_id,
                position: row.position,
            },
            storage_key: row.storage_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
