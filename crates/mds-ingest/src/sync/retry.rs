//! Exponential backoff around a single upstream fetch

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::sources::{FetchError, FetchResult};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Retry budget for one work item.
///
/// The wait before retry `k` is `base_delay * 2^(k-1)`. Rate limits and
/// cancellation are returned immediately and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Single attempt, errors returned as-is
    pub fn disabled() -> Self {
        Self::new(0, DEFAULT_BASE_DELAY)
    }

    /// Delay before retry `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, hits a non-retryable error, or the budget
    /// is spent
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> FetchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        let mut retry = 0;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err @ (FetchError::RateLimited(_) | FetchError::Cancelled)) => return Err(err),
                Err(err) => err,
            };

            if retry >= self.max_retries {
                return Err(if self.max_retries == 0 {
                    err
                } else {
                    FetchError::RetriesExhausted {
                        retries: self.max_retries,
                        last: err.to_string(),
                    }
                });
            }

            retry += 1;
            let backoff = self.delay_for(retry);
            warn!(
                attempt = retry,
                max_retries = self.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Fetch failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}
