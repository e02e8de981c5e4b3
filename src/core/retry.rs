//! Retry with exponential backoff
//!
//! Every retried operation in the crate goes through [`retry`], so build
//! stages, direct writes and mass-storage copies share the same backoff
//! schedule and cancellation behaviour.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use super::cancel::CancellationToken;

/// Growth factor between consecutive backoff delays
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Attempt budget and delay schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy. At least one attempt and a non-zero delay are enforced.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: base_delay.max(Duration::from_millis(1)),
        }
    }

    /// Maximum number of attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay slept after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = BACKOFF_MULTIPLIER.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Outcome of a retried operation that did not succeed
#[derive(Error, Debug)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Cancellation was requested before or between attempts
    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    /// All attempts failed; wraps the most recent failure
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: E,
    },
}

/// Run `op` until it succeeds, the policy is exhausted, or `token` fires.
///
/// `op` receives the 1-based attempt number. A cancelled token fails the call
/// immediately without consuming an attempt, and a failure observed while the
/// token is set is reported as cancellation rather than retried.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    name: &str,
    token: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let cancelled = || RetryError::Cancelled {
        operation: name.to_string(),
    };

    let mut attempt = 0;
    loop {
        if token.is_requested() {
            return Err(cancelled());
        }
        attempt += 1;

        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{name} succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(error) => {
                if token.is_requested() {
                    return Err(cancelled());
                }

                tracing::warn!(
                    "{name} failed (attempt {attempt}/{}): {error}",
                    policy.max_attempts()
                );

                if attempt >= policy.max_attempts() {
                    return Err(RetryError::Exhausted {
                        operation: name.to_string(),
                        attempts: attempt,
                        source: error,
                    });
                }

                let delay = policy.delay_after(attempt);
                tracing::info!("Retrying {name} in {:.1}s...", delay.as_secs_f64());
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = token.requested() => return Err(cancelled()),
                }
            }
        }
    }
}
