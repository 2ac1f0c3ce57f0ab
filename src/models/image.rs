//! Entity kinds, identities, and the unified image record view.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// The two entity categories that can own an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Profile,
    Listing,
}

impl ImageKind {
    /// Lowercase name used as the kind segment of storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Listing => "listing",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unique key identifying an image record within its kind.
///
/// A profile owns at most one image, keyed by `user_id`. A listing owns one
/// image per position slot, keyed by the composite `(listing_id, position)`
/// pair — the position is part of the identity, not a mutable attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageIdentity {
    Profile { user_id: i64 },
    Listing { listing_id: i64, position: i64 },
}

impl ImageIdentity {
    pub fn kind(&self) -> ImageKind {
        match self {
            Self::Profile { .. } => ImageKind::Profile,
            Self::Listing { .. } => ImageKind::Listing,
        }
    }
}

impl fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile { user_id } => write!(f, "profile {}", user_id),
            Self::Listing {
                listing_id,
                position,
            } => write!(f, "listing {} position {}", listing_id, position),
        }
    }
}

/// A kind-agnostic view of one stored image mapping.
///
/// The record is the source of truth for "does this entity have an image";
/// the blob under `storage_key` must track it.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// The owning entity.
    pub identity: ImageIdentity,

    /// Content-addressed object-store key of the current blob.
    pub storage_key: String,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the storage key last changed.
    pub updated_at: DateTime<Utc>,
}
