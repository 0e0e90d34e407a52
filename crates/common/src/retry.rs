use std::{fmt, future::Future, time::Duration};

use thiserror::Error;
use tracing::{debug, warn};

use crate::shutdown::Shutdown;

/// Default first retry delay.
const DEFAULT_INITIAL_DELAY_MS: u64 = 200;

/// Default multiplicative backoff factor.
const DEFAULT_FACTOR: f64 = 2.0;

/// Default delay ceiling.
const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Classifies errors the retry manager is allowed to retry.
pub trait RetryableError {
    /// Transient errors are retried; anything else short-circuits.
    fn is_retryable(&self) -> bool;
}

/// Exponential backoff policy with a delay ceiling.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    factor: f64,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, factor: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            factor,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based: the delay after the
    /// first failure is `delay_for(1)`), clamped to the ceiling.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.saturating_sub(1) as i32);
        let raw = self.initial_delay.as_secs_f64() * exp;
        Duration::from_secs_f64(raw).min(self.max_delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            DEFAULT_FACTOR,
            Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        )
    }
}

/// Terminal outcome of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("operation {operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: E,
    },

    /// The error was not retryable; surfaced as-is.
    #[error("operation {operation} failed: {source}")]
    Permanent { operation: String, source: E },

    /// Shutdown was triggered; no further attempts were made.
    #[error("operation {operation} canceled")]
    Canceled { operation: String },
}

impl<E> RetryError<E> {
    /// The last underlying error, if any.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Permanent { source, .. } => Some(source),
            Self::Canceled { .. } => None,
        }
    }
}

/// Runs `op` until it succeeds, exhausts `max_attempts`, hits a
/// non-retryable error, or shutdown triggers.
///
/// Cancellation is checked both before every attempt and while sleeping
/// between attempts, and always wins over a retry-exhaustion wrap.
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation: &str,
    max_attempts: u32,
    policy: &ExponentialBackoff,
    shutdown: &Shutdown,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: RetryableError + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut shutdown = shutdown.clone();
    let mut attempt = 0u32;

    loop {
        if shutdown.is_cancelled() {
            return Err(RetryError::Canceled {
                operation: operation.to_owned(),
            });
        }

        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => {
                return Err(RetryError::Permanent {
                    operation: operation.to_owned(),
                    source: err,
                });
            }
            Err(err) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    operation: operation.to_owned(),
                    attempts: attempt,
                    last: err,
                });
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                warn!(operation, %err, attempt, ?delay, "retrying after failure");
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!(operation, "canceled while backing off");
                        return Err(RetryError::Canceled {
                            operation: operation.to_owned(),
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
