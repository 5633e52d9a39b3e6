//! Blob storage for the chapter cache.
//!
//! Every page image and cover image lives in a [`StorageBackend`] under a
//! [`BlobKey`]. The backend knows nothing about chapters; it stores bytes
//! at paths and promises that a write (or delete) has reached durable
//! storage by the time the returned future resolves.

pub mod backend;
pub mod error;
mod key;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::key::BlobKey;
pub use crate::models::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
