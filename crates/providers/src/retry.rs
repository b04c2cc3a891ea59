//! Bounded exponential backoff for the remote variant.
//!
//! Retryable failures (network errors, per-attempt timeouts, 5xx and 429)
//! are attempted again after `base_delay * 2^n`, capped at `max_delay`.
//! When attempts run out the last error is wrapped in
//! [`InvocationError::Transport`]. Anything else surfaces immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};
use warmprompt_core::error::InvocationError;

/// Retry settings for one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is the one that just failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, target: &str, mut op: F) -> Result<T, InvocationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, InvocationError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(target_url = target, attempt, "Remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!(
                    target_url = target,
                    attempt,
                    error = %error,
                    "Remote call failed, not retrying"
                );
                return Err(error);
            }

            if attempt >= max_attempts {
                warn!(
                    target_url = target,
                    attempts = attempt,
                    error = %error,
                    "Remote call failed, attempts exhausted"
                );
                return Err(InvocationError::Transport {
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            let delay = self.delay_after(attempt);
            warn!(
                target_url = target,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Remote call failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
