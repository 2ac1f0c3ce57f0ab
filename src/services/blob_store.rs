//! Object-store contract and the on-disk implementation.
//!
//! `DiskBlobStore` lays payloads out beneath `base_path` at the path given
//! by the storage key; the key already embeds two shard directories derived
//! from the content hash, so the store itself stays path-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("invalid storage key")]
    InvalidKey,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobStoreError>;

/// Contract the consistency protocol needs from an object store.
///
/// Implementations must tolerate `delete` of a key that has no blob; the
/// protocol treats blob deletion as best-effort cleanup.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any existing blob.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> BlobResult<()>;

    /// Remove the blob at `key`. Missing blobs are not an error.
    async fn delete(&self, key: &str) -> BlobResult<()>;

    /// Whether a blob currently exists at `key`.
    async fn exists(&self, key: &str) -> BlobResult<bool>;
}

/// Local-disk object store.
#[derive(Clone)]
pub struct DiskBlobStore {
    /// Base directory on disk where blobs are stored.
    pub base_path: PathBuf,
}

impl DiskBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects empty or oversized keys, keys that begin with `/` or contain
    /// `..`, and keys carrying control characters or backslashes. Derived
    /// storage keys always pass; this guards the asset-serving path, which
    /// accepts keys from the URL.
    fn ensure_key_safe(&self, key: &str) -> BlobResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(BlobStoreError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(BlobStoreError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BlobStoreError::InvalidKey);
        }
        Ok(())
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Open a stored blob for reading, returning the file and its size.
    ///
    /// Returns `Ok(None)` when no blob exists at `key`. Not part of the
    /// `BlobStore` contract; used by the asset-serving handler, which only
    /// exists for disk-backed deployments.
    pub async fn open(&self, key: &str) -> BlobResult<Option<(File, u64)>> {
        self.ensure_key_safe(key)?;
        let path = self.blob_path(key);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BlobStoreError::Io(err)),
        };
        let len = file.metadata().await?.len();
        Ok(Some((file, len)))
    }

    /// Recursively remove empty shard directories up to the base path.
    ///
    /// Stops at the first non-empty or missing directory, or on any
    /// unexpected I/O error.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    /// Write the payload to a temp file, fsync, and atomically rename into
    /// place so a crashed upload never leaves a partial blob at the key.
    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> BlobResult<()> {
        self.ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or(BlobStoreError::InvalidKey)?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        if let Err(err) = file.write_all(&bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobStoreError::Io(err));
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobStoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BlobStoreError::Io(err));
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed blob {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", file_path.display());
            }
            Err(err) => return Err(BlobStoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        self.ensure_key_safe(key)?;
        match fs::metadata(self.blob_path(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(BlobStoreError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, DiskBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_exists_delete_round_trip() {
        let (_dir, store) = store();
        let key = "assets/img/profile/a/ab/abcd.png";

        store
            .put(key, Bytes::from_static(b"payload"), "image/png")
            .await
            .unwrap();
        assert!(store.exists(key).await.unwrap());

        store.delete(key).await.unwrap();
        assert!(!store.exists(key).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_blob() {
        let (_dir, store) = store();
        let key = "assets/img/profile/a/ab/abcd.png";

        store
            .put(key, Bytes::from_static(b"first"), "image/png")
            .await
            .unwrap();
        store
            .put(key, Bytes::from_static(b"second"), "image/png")
            .await
            .unwrap();

        let (mut file, len) = store.open(key).await.unwrap().unwrap();
        assert_eq!(len, 6);
        let mut contents = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut file, &mut contents)
            .await
            .unwrap();
        assert_eq!(contents, b"second");
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_ok() {
        let (_dir, store) = store();
        store.delete("assets/img/profile/a/ab/nope.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_shard_dirs() {
        let (dir, store) = store();
        let key = "assets/img/listing/f/fe/feed.jpg";

        store
            .put(key, Bytes::from_static(b"x"), "image/jpeg")
            .await
            .unwrap();
        store.delete(key).await.unwrap();

        assert!(!dir.path().join("assets/img/listing/f").exists());
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let (_dir, store) = store();
        for key in ["", "/etc/passwd", "a/../b", "a\\b"] {
            let err = store.put(key, Bytes::from_static(b"x"), "image/png").await;
            assert!(matches!(err, Err(BlobStoreError::InvalidKey)), "key: {key:?}");
        }
    }

    #[tokio::test]
    async fn test_open_missing_returns_none() {
        let (_dir, store) = store();
        assert!(store.open("assets/img/profile/a/ab/gone.png").await.unwrap().is_none());
    }
}
