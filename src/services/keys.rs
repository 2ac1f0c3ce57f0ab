//! Content-addressed storage key derivation.
//!
//! Keys have the form `assets/img/{kind}/{h0}/{h01}/{hash}.{ext}` where
//! `h0`/`h01` are the first one and two hex characters of the SHA-256
//! content hash and `ext` is the subtype of the `image/<subtype>` media
//! type. The two shard levels keep the per-directory file count down.

use crate::models::image::ImageKind;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix shared by every derived key.
const KEY_PREFIX: &str = "assets/img";

/// Rejection of a media type outside `image/*`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("media type `{0}` is not a supported image type")]
pub struct InvalidMediaType(pub String);

/// Compute the content hash for an image payload.
///
/// Returns the full SHA-256 digest as 64 lowercase hex characters. Called
/// once per request, before any store mutation, so every downstream
/// operation shares one hash.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Derive the storage key for `(kind, content_hash, media_type)`.
///
/// Pure and deterministic: identical inputs always produce the identical
/// key, so re-uploading the same bytes with the same media type addresses
/// the same object regardless of which entity owns it.
pub fn derive_key(
    kind: ImageKind,
    content_hash: &str,
    media_type: &str,
) -> Result<String, InvalidMediaType> {
    let ext = image_subtype(media_type)?;
    Ok(format!(
        "{}/{}/{}/{}/{}.{}",
        KEY_PREFIX,
        kind.as_str(),
        &content_hash[..1],
        &content_hash[..2],
        content_hash,
        ext
    ))
}

/// Extract the subtype of an `image/<subtype>` media type.
///
/// Normalizes case and strips parameters (`image/PNG; q=0.8` yields `png`).
/// Anything outside `image/*`, or with an empty subtype, is rejected.
fn image_subtype(media_type: &str) -> Result<String, InvalidMediaType> {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or(media_type)
        .trim()
        .to_ascii_lowercase();

    let subtype = essence
        .strip_prefix("image/")
        .ok_or_else(|| InvalidMediaType(media_type.to_string()))?;

    if subtype.is_empty() {
        return Err(InvalidMediaType(media_type.to_string()));
    }

    Ok(subtype.to_string())
}
