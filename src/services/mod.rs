pub mod blob_store;
pub mod image_service;
pub mod keys;
pub mod record_store;
