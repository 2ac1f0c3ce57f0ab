//! HTTP handlers for the image CRUD surface.
//!
//! Extracts and validates the multipart upload, builds the typed identity
//! from path parameters, and delegates consistency concerns to
//! `ImageService`. Also serves stored blobs from disk for deployments where
//! the public base URL points back at this service.

use crate::{AppState, errors::AppError, models::image::ImageIdentity};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Serialize;
use tokio_util::io::ReaderStream;

/// Maximum accepted file size (10 MiB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Successful upload/update/retrieve body.
#[derive(Debug, Serialize)]
pub struct ImageUrlResponse {
    /// Externally reachable URL of the blob.
    pub url: String,
    /// The content-addressed storage key.
    pub key: String,
}

/// Successful delete confirmation.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// A validated image upload: the payload and its declared media type.
struct ImageUpload {
    bytes: Bytes,
    media_type: String,
}

/// Pull the single `file` part out of a multipart body.
///
/// Other fields are ignored. The part must declare a content type and stay
/// within the upload limit; media-type semantics (is it an image?) are the
/// service's concern, not checked here.
async fn read_image_upload(multipart: &mut Multipart) -> Result<ImageUpload, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        tracing::warn!("multipart parsing error: {}", err);
        AppError::bad_request("malformed multipart body")
    })? {
        if field.name() != Some("file") {
            tracing::debug!("ignoring multipart field {:?}", field.name());
            continue;
        }

        let media_type = field
            .content_type()
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("file part is missing a content type"))?;

        let bytes = field.bytes().await.map_err(|err| {
            tracing::warn!("failed to read file part: {}", err);
            AppError::bad_request("failed to read file data")
        })?;

        if bytes.is_empty() {
            return Err(AppError::bad_request("file part is empty"));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::bad_request("file exceeds the 10 MiB upload limit"));
        }

        return Ok(ImageUpload { bytes, media_type });
    }

    Err(AppError::bad_request("missing `file` field"))
}

fn image_url_body(state: &AppState, key: String) -> Json<ImageUrlResponse> {
    Json(ImageUrlResponse {
        url: state.config.public_url(&key),
        key,
    })
}

/// POST `/images/profile/{user_id}` — attach an image to a profile.
pub async fn upload_profile_image(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let upload = read_image_upload(&mut multipart).await?;
    let key = state
        .images
        .create(
            ImageIdentity::Profile { user_id },
            upload.bytes,
            &upload.media_type,
        )
        .await?;
    Ok((StatusCode::CREATED, image_url_body(&state, key)))
}

/// PUT `/images/profile/{user_id}` — replace a profile's image.
pub async fn replace_profile_image(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let upload = read_image_upload(&mut multipart).await?;
    let key = state
        .images
        .replace(
            ImageIdentity::Profile { user_id },
            upload.bytes,
            &upload.media_type,
        )
        .await?;
    Ok(image_url_body(&state, key))
}

/// GET `/images/profile/{user_id}` — URL of a profile's current image.
pub async fn get_profile_image(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let key = state
        .images
        .locate(ImageIdentity::Profile { user_id })
        .await?;
    Ok(image_url_body(&state, key))
}

/// DELETE `/images/profile/{user_id}` — remove a profile's image.
pub async fn delete_profile_image(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state
        .images
        .delete(ImageIdentity::Profile { user_id })
        .await?;
    Ok(Json(DeleteResponse {
        message: "image deleted".into(),
    }))
}

/// POST `/images/listing/{listing_id}/{position}` — attach an image to a
/// listing slot.
pub async fn upload_listing_image(
    State(state): State<AppState>,
    Path((listing_id, position)): Path<(i64, i64)>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let upload = read_image_upload(&mut multipart).await?;
    let key = state
        .images
        .create(
            ImageIdentity::Listing {
                listing_id,
                position,
            },
            upload.bytes,
            &upload.media_type,
        )
        .await?;
    Ok((StatusCode::CREATED, image_url_body(&state, key)))
}

/// PUT `/images/listing/{listing_id}/{position}` — replace a slot's image.
pub async fn replace_listing_image(
    State(state): State<AppState>,
    Path((listing_id, position)): Path<(i64, i64)>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let upload = read_image_upload(&mut multipart).await?;
    let key = state
        .images
        .replace(
            ImageIdentity::Listing {
                listing_id,
                position,
            },
            upload.bytes,
            &upload.media_type,
        )
        .await?;
    Ok(image_url_body(&state, key))
}

/// GET `/images/listing/{listing_id}/{position}` — URL of a slot's image.
pub async fn get_listing_image(
    State(state): State<AppState>,
    Path((listing_id, position)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let key = state
        .images
        .locate(ImageIdentity::Listing {
            listing_id,
            position,
        })
        .await?;
    Ok(image_url_body(&state, key))
}

/// DELETE `/images/listing/{listing_id}/{position}` — remove a slot's image.
pub async fn delete_listing_image(
    State(state): State<AppState>,
    Path((listing_id, position)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    state
        .images
        .delete(ImageIdentity::Listing {
            listing_id,
            position,
        })
        .await?;
    Ok(Json(DeleteResponse {
        message: "image deleted".into(),
    }))
}

/// GET `/assets/{*path}` — stream a stored blob.
pub async fn serve_asset(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    // Route strips the leading segment; the storage key includes it.
    let key = format!("assets/{}", path);

    let opened = state.images.blobs.open(&key).await.map_err(|err| {
        use crate::services::blob_store::BlobStoreError;
        match err {
            BlobStoreError::InvalidKey => AppError::bad_request("invalid asset path"),
            BlobStoreError::Io(inner) => {
                tracing::error!("failed to open blob {}: {}", key, inner);
                AppError::internal("object store failure")
            }
        }
    })?;
    let (file, len) = opened.ok_or_else(|| AppError::not_found("no asset at this path"))?;

    let stream = ReaderStream::new(file);
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type_for_key(&key))
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&len.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    Ok(response)
}

/// Media type of a stored blob, recovered from the key's extension.
///
/// The extension is the media subtype by construction, so this is the exact
/// inverse of key derivation.
fn content_type_for_key(key: &str) -> String {
    match key.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && !ext.contains('/') => format!("image/{}", ext),
        _ => "application/octet-stream".into(),
    }
}
