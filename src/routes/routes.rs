//! Defines routes for the image CRUD surface and asset serving.
//!
//! ## Structure
//! - **Profile image endpoints**
//!   - `POST   /images/profile/{user_id}` — upload
//!   - `PUT    /images/profile/{user_id}` — replace
//!   - `GET    /images/profile/{user_id}` — retrieve URL
//!   - `DELETE /images/profile/{user_id}` — delete
//!
//! - **Listing image endpoints** (one image per `(listing, position)` slot)
//!   - `POST   /images/listing/{listing_id}/{position}` — upload
//!   - `PUT    /images/listing/{listing_id}/{position}` — replace
//!   - `GET    /images/listing/{listing_id}/{position}` — retrieve URL
//!   - `DELETE /images/listing/{listing_id}/{position}` — delete
//!
//! - **Assets**
//!   - `GET    /assets/{*path}` — stream the stored blob
//!
//! Uploads carry a single multipart `file` part, capped at 10 MiB plus a
//! small margin for multipart framing.

use crate::handlers::{
    health_handlers::{healthz, readyz},
    image_handlers::{
        MAX_UPLOAD_BYTES, delete_listing_image, delete_profile_image, get_listing_image,
        get_profile_image, replace_listing_image, replace_profile_image, serve_asset,
        upload_listing_image, upload_profile_image,
    },
};
use crate::AppState;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Margin on top of the file cap for multipart boundaries and headers.
const UPLOAD_FRAMING_MARGIN: usize = 64 * 1024;

/// Build and return the router for all image-service routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Profile image routes
        .route(
            "/images/profile/{user_id}",
            post(upload_profile_image)
                .put(replace_profile_image)
                .get(get_profile_image)
                .delete(delete_profile_image),
        )
        // Listing image routes
        .route(
            "/images/listing/{listing_id}/{position}",
            post(upload_listing_image)
                .put(replace_listing_image)
                .get(get_listing_image)
                .delete(delete_listing_image),
        )
        // Blob serving
        .route("/assets/{*path}", get(serve_asset))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + UPLOAD_FRAMING_MARGIN))
}
