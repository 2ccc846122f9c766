//! Exponential backoff for rate-limited remote calls.

use crate::utils::errors::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff parameters for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. `1` never retries.
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after a rate-limited attempt that itself waited `previous`.
    pub fn next_backoff(&self, previous: Duration) -> Duration {
        let next = if previous.is_zero() {
            self.initial_backoff
        } else {
            previous.saturating_mul(2)
        };
        next.min(self.max_backoff)
    }
}

/// Run `operation`, retrying while it fails with a rate-limit error.
///
/// The first attempt runs immediately. Every rate-limited failure doubles the
/// delay (starting at `initial_backoff`, capped at `max_backoff`) until
/// `max_attempts` attempts have been made, after which the last error is
/// returned. Any other error is returned straight away.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = Duration::ZERO;
    let mut attempt = 0;

    loop {
        if !backoff.is_zero() {
            tokio::time::sleep(backoff).await;
        }
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_rate_limited() && attempt < max_attempts => {
                backoff = policy.next_backoff(backoff);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = backoff.as_millis() as u64,
                    "Remote store is rate limiting, backing off: {}",
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }
}
