//! Bounded retries for network-bound steps.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::time::Duration;
use tankobon_config::DownloadConfig;
use tankobon_source::error::Result as SourceResult;
use tokio_util::sync::CancellationToken;

/// How often, and how patiently, a single network step is retried.
///
/// Retries are local to a step: a page that needs three attempts doesn't use
/// up attempts of the page after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    /// Pause before the first retry. Doubles for every retry after that.
    pub backoff: Duration,
}
impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}
impl From<&DownloadConfig> for RetryPolicy {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }
}
impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, runs out of attempts,
    /// or `token` is cancelled.
    ///
    /// Every attempt and every back-off is raced against the token, so a
    /// cancelled download never waits on the network.
    pub(crate) async fn run<T, F, Fut>(&self, token: &CancellationToken, step: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let mut backoff = self.backoff;
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                () = token.cancelled() => exn::bail!(ErrorKind::Cancelled),
                result = op() => result,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() {
                return Err(err).or_raise(|| ErrorKind::NotFound);
            }
            if attempt >= self.max_attempts {
                tracing::warn!(step, attempts = attempt, "Giving up after repeated network failures");
                return Err(err).or_raise(|| ErrorKind::Network);
            }
            tracing::debug!(step, attempt, error = ?err, backoff = ?backoff, "Network step failed; retrying");
            tokio::select! {
                biased;
                () = token.cancelled() => exn::bail!(ErrorKind::Cancelled),
                () = tokio::time::sleep(backoff) => {},
            }
            backoff = backoff.saturating_mul(2);
            attempt += 1;
        }
    }
}
