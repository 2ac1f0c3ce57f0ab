//! Core data models for the image asset service.
//!
//! These entities represent the mapping from an owning entity (a user
//! profile or a listing slot) to the content-addressed storage key of its
//! image. They map cleanly to database tables via `sqlx::FromRow` and
//! serialize naturally as JSON via `serde`.

pub mod image;
pub mod listing_image;
pub mod profile_image;
