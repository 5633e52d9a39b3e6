//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use crate::state::FailureReason;
use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a coordinator failure.
///
/// ### Download Errors
/// - [`ErrorKind::Network`] - retries were exhausted.
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::NotDownloadable`]
/// - [`ErrorKind::Offline`]
/// - [`ErrorKind::Cancelled`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Cache`]
///
/// ### Reading Errors
/// - [`ErrorKind::NotCached`]
/// - [`ErrorKind::PageOutOfRange`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The source couldn't be reached, even after retrying.
    #[display("network failure")]
    Network,
    /// The source doesn't know the chapter (or one of its pages).
    #[display("not found at source")]
    NotFound,
    /// A blob store operation failed.
    #[display("blob storage failure")]
    Storage,
    /// A metadata store operation failed.
    #[display("metadata cache failure")]
    Cache,
    /// The chapter is already being downloaded. Never surfaced to callers of
    /// the coordinator, who get attached to the running download instead.
    #[display("download already in progress")]
    AlreadyInProgress,
    #[display("download cancelled")]
    Cancelled,
    /// Chapter is hosted elsewhere or has no pages.
    #[display("chapter cannot be downloaded")]
    NotDownloadable,
    /// The coordinator was told to stay off the network.
    #[display("network access is disabled")]
    Offline,
    /// Reading from a chapter (or cover) that isn't in the cache.
    #[display("not cached")]
    NotCached,
    #[display("page {index} is out of range for a chapter of {pages} pages")]
    PageOutOfRange { index: u32, pages: u32 },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Reason to report in [`DownloadState::Failed`](crate::DownloadState::Failed),
    /// or `None` when the failure isn't a failure from the user's point of
    /// view (cancellation, single-flight).
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Network => Some(FailureReason::Network),
            Self::NotFound => Some(FailureReason::NotFound),
            Self::Offline => Some(FailureReason::Offline),
            Self::Storage | Self::Cache | Self::NotCached | Self::PageOutOfRange { .. } => {
                Some(FailureReason::Storage)
            },
            Self::AlreadyInProgress | Self::Cancelled | Self::NotDownloadable => None,
        }
    }
}
