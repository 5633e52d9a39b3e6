//! Storage models.

use std::path::PathBuf;
use time::OffsetDateTime;

/// Blob metadata returned by storage backends.
///
/// Used for listing operations, most importantly the orphan sweep which
/// compares what is stored against what the metadata store knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// Blob size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime) -> Self {
        Self { path: path.into(), size, modified }
    }
}
