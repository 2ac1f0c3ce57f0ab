//! The create/replace/delete/locate consistency protocol.
//!
//! The relational record and the object-store blob are not transactional
//! together, so each operation sequences its sub-steps to keep the two in
//! step where possible. Ordering rule: the record never points at a blob
//! that was deliberately removed — an orphaned blob is acceptable garbage,
//! a dangling record reference is not. Required sub-steps short-circuit the
//! operation; only the explicitly best-effort cleanup steps (old-blob delete
//! on replace, blob delete on delete) log and continue past failure.

use crate::{
    models::image::ImageIdentity,
    services::{
        blob_store::{BlobStore, BlobStoreError},
        keys::{self, InvalidMediaType},
        record_store::{RecordStore, RecordStoreError},
    },
};
use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error(transparent)]
    InvalidMediaType(#[from] InvalidMediaType),
    #[error("{0} already has an image")]
    AlreadyExists(ImageIdentity),
    #[error("no image found for {0}")]
    NotFound(ImageIdentity),
    #[error(transparent)]
    RecordStore(RecordStoreError),
    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
}

impl From<RecordStoreError> for ImageError {
    fn from(err: RecordStoreError) -> Self {
        match err {
            // The UNIQUE constraint is the final arbiter of create races; a
            // lost race is a duplicate create, not a store failure.
            RecordStoreError::DuplicateKey(identity) => ImageError::AlreadyExists(identity),
            RecordStoreError::NotFound(identity) => ImageError::NotFound(identity),
            other => ImageError::RecordStore(other),
        }
    }
}

pub type ImageResult<T> = Result<T, ImageError>;

/// Orchestrates record-store and blob-store operations for image CRUD.
///
/// Holds injected store handles, constructed once at startup and shared
/// thereafter. No in-memory state spans calls; the relational store is the
/// sole point of coordination between concurrent requests.
#[derive(Clone)]
pub struct ImageService<R, B> {
    pub records: R,
    pub blobs: B,
}

impl<R: RecordStore, B: BlobStore> ImageService<R, B> {
    pub fn new(records: R, blobs: B) -> Self {
        Self { records, blobs }
    }

    /// Attach an image to an entity that has none.
    ///
    /// The record is inserted before the blob is uploaded. If the upload
    /// then fails the record stays in place, referencing a blob that is not
    /// there yet; rolling the record back could itself fail and the caller
    /// can retry the upload path, so no rollback is attempted.
    pub async fn create(
        &self,
        identity: ImageIdentity,
        bytes: Bytes,
        media_type: &str,
    ) -> ImageResult<String> {
        let hash = keys::content_hash(&bytes);
        let key = keys::derive_key(identity.kind(), &hash, media_type)?;

        if self.records.find(identity).await?.is_some() {
            return Err(ImageError::AlreadyExists(identity));
        }

        self.records.insert(identity, &key).await?;
        self.blobs.put(&key, bytes, media_type).await?;

        Ok(key)
    }

    /// Swap an entity's image for new content.
    ///
    /// The record is repointed before storage is touched, then the new blob
    /// is uploaded and the previous blob removed best-effort. When the new
    /// content hashes to the old key (identical bytes re-uploaded) the
    /// cleanup is skipped so the live blob survives.
    pub async fn replace(
        &self,
        identity: ImageIdentity,
        bytes: Bytes,
        media_type: &str,
    ) -> ImageResult<String> {
        let existing = self
            .records
            .find(identity)
            .await?
            .ok_or(ImageError::NotFound(identity))?;
        let old_key = existing.storage_key;

        let hash = keys::content_hash(&bytes);
        let new_key = keys::derive_key(identity.kind(), &hash, media_type)?;

        self.records.update_key(identity, &new_key).await?;
        self.blobs.put(&new_key, bytes, media_type).await?;

        if old_key != new_key {
            if let Err(err) = self.blobs.delete(&old_key).await {
                warn!("failed to remove replaced blob {}: {}", old_key, err);
            }
        }

        Ok(new_key)
    }

    /// Detach and discard an entity's image.
    ///
    /// The record goes first; once it is gone the operation is a success
    /// even if the blob removal fails and leaves garbage behind.
    pub async fn delete(&self, identity: ImageIdentity) -> ImageResult<()> {
        let existing = self
            .records
            .find(identity)
            .await?
            .ok_or(ImageError::NotFound(identity))?;

        self.records.delete(identity).await?;

        if let Err(err) = self.blobs.delete(&existing.storage_key).await {
            warn!(
                "failed to remove blob {} for deleted {}: {}",
                existing.storage_key, identity, err
            );
        }

        Ok(())
    }

    /// Return the storage key of an entity's current image. Pure read.
    pub async fn locate(&self, identity: ImageIdentity) -> ImageResult<String> {
        let record = self
            .records
            .find(identity)
            .await?
            .ok_or(ImageError::NotFound(identity))?;
        Ok(record.storage_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        blob_store::{BlobResult, BlobStoreError, DiskBlobStore},
        keys,
        record_store::{SqliteRecordStore, memory_pool},
    };
    use async_trait::async_trait;
    use std::io;

    const PNG: &str = "image/png";
    const JPEG: &str = "image/jpeg";

    async fn service() -> (tempfile::TempDir, ImageService<SqliteRecordStore, DiskBlobStore>) {
        let dir = tempfile::tempdir().unwrap();
        let records = SqliteRecordStore::new(memory_pool().await);
        let blobs = DiskBlobStore::new(dir.path().to_path_buf());
        (dir, ImageService::new(records, blobs))
    }

    fn profile(user_id: i64) -> ImageIdentity {
        ImageIdentity::Profile { user_id }
    }

    fn listing(listing_id: i64, position: i64) -> ImageIdentity {
        ImageIdentity::Listing {
            listing_id,
            position,
        }
    }

    #[tokio::test]
    async fn test_create_profile_returns_derived_key() {
        let (_dir, svc) = service().await;
        let bytes = Bytes::from_static(b"portrait bytes");
        let hash = keys::content_hash(&bytes);

        let key = svc.create(profile(42), bytes, PNG).await.unwrap();
        assert_eq!(
            key,
            format!("assets/img/profile/{}/{}/{}.png", &hash[..1], &hash[..2], hash)
        );
        assert!(svc.blobs.exists(&key).await.unwrap());
        assert_eq!(svc.locate(profile(42)).await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_second_create_fails_already_exists() {
        let (_dir, svc) = service().await;
        let bytes = Bytes::from_static(b"portrait bytes");

        svc.create(profile(42), bytes.clone(), PNG).await.unwrap();
        let err = svc.create(profile(42), bytes, PNG).await.unwrap_err();
        assert!(matches!(err, ImageError::AlreadyExists(i) if i == profile(42)));
    }

    #[tokio::test]
    async fn test_identical_bytes_share_a_key_across_identities() {
        let (_dir, svc) = service().await;
        let bytes = Bytes::from_static(b"shared artwork");

        let k1 = svc.create(listing(7, 0), bytes.clone(), JPEG).await.unwrap();
        let k2 = svc.create(listing(8, 0), bytes, JPEG).await.unwrap();
        assert_eq!(k1, k2);
        assert!(k1.starts_with("assets/img/listing/"));
        assert!(k1.ends_with(".jpeg"));
    }

    #[tokio::test]
    async fn test_create_listing_and_locate() {
        let (_dir, svc) = service().await;
        let bytes = Bytes::from_static(b"gallery shot");

        let key = svc.create(listing(7, 0), bytes, JPEG).await.unwrap();
        assert_eq!(svc.locate(listing(7, 0)).await.unwrap(), key);

        // The neighbouring slot is a distinct identity.
        let err = svc.locate(listing(7, 1)).await.unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_replace_repoints_record_and_swaps_blobs() {
        let (_dir, svc) = service().await;

        let old_key = svc
            .create(profile(42), Bytes::from_static(b"first portrait"), PNG)
            .await
            .unwrap();
        let new_key = svc
            .replace(profile(42), Bytes::from_static(b"second portrait"), PNG)
            .await
            .unwrap();

        assert_ne!(old_key, new_key);
        assert_eq!(svc.locate(profile(42)).await.unwrap(), new_key);
        assert!(svc.blobs.exists(&new_key).await.unwrap());
        assert!(!svc.blobs.exists(&old_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_absent_fails_not_found() {
        let (_dir, svc) = service().await;
        let err = svc
            .replace(profile(99), Bytes::from_static(b"x"), PNG)
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::NotFound(i) if i == profile(99)));
    }

    #[tokio::test]
    async fn test_replace_with_identical_bytes_keeps_blob_alive() {
        let (_dir, svc) = service().await;
        let bytes = Bytes::from_static(b"stable portrait");

        let key = svc.create(profile(42), bytes.clone(), PNG).await.unwrap();
        let replaced = svc.replace(profile(42), bytes, PNG).await.unwrap();

        assert_eq!(key, replaced);
        assert!(svc.blobs.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_clears_lookup_and_blob() {
        let (_dir, svc) = service().await;
        let key = svc
            .create(profile(42), Bytes::from_static(b"portrait"), PNG)
            .await
            .unwrap();

        svc.delete(profile(42)).await.unwrap();

        let err = svc.locate(profile(42)).await.unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
        assert!(!svc.blobs.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_absent_fails_not_found() {
        let (_dir, svc) = service().await;
        let err = svc.delete(profile(99)).await.unwrap_err();
        assert!(matches!(err, ImageError::NotFound(i) if i == profile(99)));
    }

    #[tokio::test]
    async fn test_non_image_media_type_rejected_before_any_store_call() {
        let (_dir, svc) = service().await;
        let err = svc
            .create(profile(42), Bytes::from_static(b"not an image"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::InvalidMediaType(_)));

        // Nothing was written anywhere: a later create must succeed.
        svc.create(profile(42), Bytes::from_static(b"real image"), PNG)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lost_create_race_surfaces_as_already_exists() {
        let (_dir, svc) = service().await;
        let bytes = Bytes::from_static(b"portrait");

        // Simulate losing the race: the row appears after our existence
        // check would have run, so the insert itself collides.
        svc.records
            .insert(profile(42), "assets/img/profile/0/00/rival.png")
            .await
            .unwrap();

        let err = svc.create(profile(42), bytes, PNG).await.unwrap_err();
        assert!(matches!(err, ImageError::AlreadyExists(_)));
    }

    /// Blob store whose writes always fail; deletes succeed.
    struct BrokenBlobStore;

    #[async_trait]
    impl BlobStore for BrokenBlobStore {
        async fn put(&self, _key: &str, _bytes: Bytes, _content_type: &str) -> BlobResult<()> {
            Err(BlobStoreError::Io(io::Error::other("disk full")))
        }

        async fn delete(&self, _key: &str) -> BlobResult<()> {
            Ok(())
        }

        async fn exists(&self, _key: &str) -> BlobResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_record_in_place() {
        let records = SqliteRecordStore::new(memory_pool().await);
        let svc = ImageService::new(records, BrokenBlobStore);

        let err = svc
            .create(profile(42), Bytes::from_static(b"portrait"), PNG)
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::BlobStore(_)));

        // No rollback: the record exists and references the missing blob.
        assert!(svc.locate(profile(42)).await.is_ok());
    }

    /// Blob store that accepts writes but refuses deletes.
    struct StickyBlobStore(DiskBlobStore);

    #[async_trait]
    impl BlobStore for StickyBlobStore {
        async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> BlobResult<()> {
            self.0.put(key, bytes, content_type).await
        }

        async fn delete(&self, _key: &str) -> BlobResult<()> {
            Err(BlobStoreError::Io(io::Error::other("permission denied")))
        }

        async fn exists(&self, key: &str) -> BlobResult<bool> {
            self.0.exists(key).await
        }
    }

    #[tokio::test]
    async fn test_replace_tolerates_old_blob_cleanup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let records = SqliteRecordStore::new(memory_pool().await);
        let svc = ImageService::new(
            records,
            StickyBlobStore(DiskBlobStore::new(dir.path().to_path_buf())),
        );

        svc.create(profile(42), Bytes::from_static(b"first"), PNG)
            .await
            .unwrap();
        let new_key = svc
            .replace(profile(42), Bytes::from_static(b"second"), PNG)
            .await
            .unwrap();

        assert_eq!(svc.locate(profile(42)).await.unwrap(), new_key);
        assert!(svc.blobs.exists(&new_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_tolerates_blob_cleanup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let records = SqliteRecordStore::new(memory_pool().await);
        let svc = ImageService::new(
            records,
            StickyBlobStore(DiskBlobStore::new(dir.path().to_path_buf())),
        );

        svc.create(profile(42), Bytes::from_static(b"portrait"), PNG)
            .await
            .unwrap();
        svc.delete(profile(42)).await.unwrap();

        let err = svc.locate(profile(42)).await.unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
    }
}
