use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether the coordinator may touch the network at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    #[default]
    Online,
    /// Serve what's cached; every download of an uncached chapter fails
    /// without a single request.
    Offline,
}
impl NetworkPolicy {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Attempts per network step (metadata, page list, each page) before the
    /// download is given up on. `1` means no retries.
    pub max_attempts: u32,
    /// Back-off before the first retry, doubled for every retry after it.
    pub retry_backoff_ms: u64,
    pub network: NetworkPolicy,
    /// Fetch the manga's cover image after its first chapter is committed.
    pub fetch_cover_art: bool,
}
impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 500,
            network: NetworkPolicy::Online,
            fetch_cover_art: true,
        }
    }
}
impl DownloadConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            exn::bail!(ErrorKind::Invalid("downloads.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}
