//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for blob operations so the coordinator doesn't care whether
//! pages land on the local disk or in memory during tests.

mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::local::LocalBackend;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::models::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface for blob storage backends.
///
/// All storage operations are asynchronous. It's a glorified CRUD interface
/// keyed by relative paths.
///
/// # Durability
/// The download coordinator moves on to its next step (and eventually
/// commits a chapter) as soon as a write resolves. Implementations must not
/// report success for a [`write`](Self::write) or [`delete`](Self::delete)
/// until the change would survive a crash.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use tankobon_model::ChapterId;
/// use tankobon_storage::{BlobKey, backend::StorageBackend, error::Result};
///
/// async fn first_page_size(backend: &dyn StorageBackend, chapter: &ChapterId) -> Result<u64> {
///     let path = BlobKey::page(chapter, 0).path()?;
///     if backend.exists(&path).await? {
///         Ok(backend.stat(&path).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// List all blobs matching an optional prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream blob metadata matching an optional prefix.
    ///
    /// Yields results incrementally. If a prefix is provided, only blobs
    /// whose paths start with the prefix (component-wise) are returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// # use tankobon_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream(None);
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a blob exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read blob contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write blob contents, replacing any previous blob at that path.
    ///
    /// # Notes
    /// - Implementations should create parent directories as needed.
    /// - Readers never observe a half-written blob: the old content or the
    ///   new content, nothing in between.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a blob.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Get blob metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
