//! Per-chapter download state.

use derive_more::Display;

/// Why a download ended in [`DownloadState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum FailureReason {
    /// The source was unreachable, even after retrying.
    #[display("network")]
    Network,
    /// The source doesn't have the chapter (anymore).
    #[display("not found")]
    NotFound,
    /// Writing to the blob or metadata store failed.
    #[display("storage")]
    Storage,
    /// Network access is disabled.
    #[display("offline")]
    Offline,
}

/// Where a chapter is in its download lifecycle.
///
/// Per chapter, states only ever move forward within a single download:
/// `NotCached`/`Failed` → `Queued` → `Downloading` (with `fetched` counting
/// up to `total`) → `Cached`. Cancellation and failure jump straight to
/// `NotCached` and `Failed` respectively.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum DownloadState {
    #[display("not cached")]
    NotCached,
    #[display("queued")]
    Queued,
    #[display("downloading ({fetched}/{total})")]
    Downloading { fetched: u32, total: u32 },
    #[display("cached")]
    Cached,
    #[display("failed ({reason})")]
    Failed { reason: FailureReason },
    /// Hosted elsewhere (external reader) or without any pages.
    #[display("not downloadable")]
    NotDownloadable,
}
impl DownloadState {
    /// No further transitions will happen without a new request.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// A download is running for the chapter.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Downloading { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(DownloadState::Cached.is_terminal());
        assert!(DownloadState::NotCached.is_terminal());
        assert!(DownloadState::NotDownloadable.is_terminal());
        assert!(DownloadState::Failed { reason: FailureReason::Network }.is_terminal());
        assert!(DownloadState::Queued.is_active());
        assert!(DownloadState::Downloading { fetched: 0, total: 3 }.is_active());
    }

    #[test]
    fn test_display() {
        assert_eq!(DownloadState::Downloading { fetched: 2, total: 9 }.to_string(), "downloading (2/9)");
        assert_eq!(DownloadState::Failed { reason: FailureReason::NotFound }.to_string(), "failed (not found)");
    }
}
