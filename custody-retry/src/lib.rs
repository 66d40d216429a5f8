//! Caller-side retry and backoff for Custody operations
//!
//! The snapshot core never retries on its own: a failed snapshot is reported
//! once and a fresh snapshot id is minted by the next attempt. Callers that
//! want to re-attempt transient failures wrap the call in [`with_backoff`]
//! and classify their error type through [`RetryableError`].

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Terminal outcome of a retried operation
#[derive(Error, Debug)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("operation '{operation}' gave up after {attempts} attempts: {source}")]
    Exhausted {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: E,
    },
    #[error("operation '{operation}' failed permanently on attempt {attempts}: {source}")]
    Permanent {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> usize {
        match self {
            Self::Exhausted { attempts, .. } | Self::Permanent { attempts, .. } => *attempts,
        }
    }

    /// The error returned by the last attempt
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::Permanent { source, .. } => source,
        }
    }
}

/// Classifies errors as worth retrying or not
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Backoff schedule plus an attempt cap
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: ExponentialBackoff,
    pub max_attempts: usize,
}

impl RetryPolicy {
    pub fn new(backoff: ExponentialBackoff, max_attempts: usize) -> Self {
        Self {
            backoff,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Same schedule, different attempt cap
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(default_backoff_policy(), 3)
    }
}

/// Execute an operation, retrying transient failures with exponential backoff
///
/// `op` receives the 1-based attempt number. The loop stops on the first
/// success, on a permanent error, when `max_attempts` is reached, or when the
/// backoff schedule's elapsed-time budget runs out.
pub async fn with_backoff<F, Fut, T, E>(
    operation: &'static str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::error::Error + 'static,
{
    let RetryPolicy {
        mut backoff,
        max_attempts,
    } = policy;
    backoff.reset();

    let mut attempt = 1;
    loop {
        debug!(operation, attempt, "attempting operation");

        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_permanent() => {
                warn!(operation, attempt, error = %err, "operation failed permanently");
                return Err(RetryError::Permanent {
                    operation,
                    attempts: attempt,
                    source: err,
                });
            }
            Err(err) => {
                let delay = if attempt >= max_attempts {
                    None
                } else {
                    backoff.next_backoff()
                };

                let Some(delay) = delay else {
                    warn!(operation, attempt, error = %err, "retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        operation,
                        attempts: attempt,
                        source: err,
                    });
                };

                warn!(operation, attempt, ?delay, error = %err, "transient failure, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Default backoff policy for general operations
pub fn default_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_max_interval(Duration::from_secs(5))
        .with_max_elapsed_time(Some(Duration::from_secs(30)))
        .with_multiplier(2.0)
        .build()
}

/// Backoff policy for whole-snapshot retries
///
/// Snapshots of large namespaces take a while, so the schedule starts slower
/// and allows a longer overall budget.
pub fn snapshot_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_max_interval(Duration::from_secs(10))
        .with_max_elapsed_time(Some(Duration::from_secs(120)))
        .with_multiplier(1.5)
        .build()
}

/// Backoff policy for local repository operations (shorter timeouts)
pub fn local_repository_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(50))
        .with_max_interval(Duration::from_secs(1))
        .with_max_elapsed_time(Some(Duration::from_secs(10)))
        .with_multiplier(2.0)
        .build()
}
