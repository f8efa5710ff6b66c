//! Bounded retries with exponential backoff, jitter and per-attempt timeouts.
//!
//! The retry loop is generic over what one attempt does. [`retry`] takes a
//! closure; [`RetryExecutor::execute`] plugs in the three [`OperationSpec`]
//! variants (local shell, remote command, HTTP request).
//!
//! | Attempt error          | Consumes a retry | Stops the loop |
//! |------------------------|------------------|----------------|
//! | `Failed`               | yes              | when budget is spent |
//! | `TimedOut`             | yes              | when budget is spent |
//! | `Fatal`                | yes              | immediately    |
//! | `Cancelled`            | no               | immediately    |

mod operation;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelToken;

pub use operation::{HttpMethod, Operation, OperationOutput, OperationSpec, RetryExecutor};

/// How an operation is retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least 1).
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound of the uniform random delay added to each backoff.
    pub jitter: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            jitter: Duration::ZERO,
            attempt_timeout,
        }
    }

    /// One attempt, no backoff. Used for builds and probes.
    pub fn single(attempt_timeout: Duration) -> Self {
        Self::new(1, Duration::from_millis(1), attempt_timeout)
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries < 1 {
            return Err("max_retries must be at least 1".to_string());
        }
        if self.base_delay.is_zero() {
            return Err("base delay must be greater than zero".to_string());
        }
        if self.attempt_timeout.is_zero() {
            return Err("attempt timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            jitter: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Delay before attempt `attempt + 1`: `base * 2^(attempt-1) + jitter`.
pub fn backoff_delay(base: Duration, attempt: u32, jitter: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
    base.saturating_mul(factor).saturating_add(jitter)
}

fn sample_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    /// Transient failure: non-zero exit, refused connection, bad status.
    #[error("{0}")]
    Failed(String),
    #[error("attempt timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),
    /// Failure that another attempt cannot fix (e.g. auth needs a prompt).
    #[error("{0}")]
    Fatal(String),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

/// One try of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationAttempt {
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub timeout_ms: u64,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    /// Backoff slept before the next attempt, if there was one.
    pub delay_before_next_ms: Option<u64>,
}

/// Successful terminal outcome with the attempt log.
#[derive(Debug, Clone)]
pub struct Completed<T> {
    pub value: T,
    pub attempts: Vec<OperationAttempt>,
}

/// Failed terminal outcome: the retry budget is spent (or the loop was
/// stopped by a fatal error or cancellation).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{label} failed after {} attempt(s): {last_error}", .attempts.len())]
pub struct Exhausted {
    pub label: String,
    pub attempts: Vec<OperationAttempt>,
    pub last_error: AttemptError,
}

impl Exhausted {
    pub fn is_cancelled(&self) -> bool {
        self.last_error == AttemptError::Cancelled
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

fn record(
    attempt_number: u32,
    started_at: DateTime<Utc>,
    policy: &RetryPolicy,
    error: Option<&AttemptError>,
    delay: Option<Duration>,
) -> OperationAttempt {
    let outcome = match error {
        None => AttemptOutcome::Succeeded,
        Some(AttemptError::TimedOut(_)) => AttemptOutcome::TimedOut,
        Some(AttemptError::Cancelled) => AttemptOutcome::Aborted,
        Some(_) => AttemptOutcome::Failed,
    };
    OperationAttempt {
        attempt_number,
        started_at,
        timeout_ms: policy.attempt_timeout.as_millis() as u64,
        outcome,
        error: error.map(ToString::to_string),
        delay_before_next_ms: delay.map(|d| d.as_millis() as u64),
    }
}

/// Run `attempt_fn` until it succeeds or the policy is exhausted.
///
/// `attempt_fn` receives the 1-based attempt number. Each attempt is bounded
/// by `policy.attempt_timeout`; an attempt that exceeds it counts as
/// [`AttemptError::TimedOut`] and consumes one retry.
pub async fn retry<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut attempt_fn: F,
) -> Result<Completed<T>, Exhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempts = Vec::with_capacity(max_attempts as usize);
    let mut attempt = 1u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Exhausted {
                label: label.to_string(),
                attempts,
                last_error: AttemptError::Cancelled,
            });
        }

        let started_at = Utc::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AttemptError::Cancelled),
            outcome = tokio::time::timeout(policy.attempt_timeout, attempt_fn(attempt)) => {
                match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(AttemptError::TimedOut(policy.attempt_timeout)),
                }
            }
        };

        let err = match result {
            Ok(value) => {
                attempts.push(record(attempt, started_at, policy, None, None));
                debug!(label, attempt, "attempt succeeded");
                return Ok(Completed { value, attempts });
            }
            Err(err) => err,
        };

        let terminal = matches!(err, AttemptError::Fatal(_) | AttemptError::Cancelled)
            || attempt >= max_attempts;
        if terminal {
            attempts.push(record(attempt, started_at, policy, Some(&err), None));
            warn!(label, attempt, max_attempts, error = %err, "giving up");
            return Err(Exhausted {
                label: label.to_string(),
                attempts,
                last_error: err,
            });
        }

        let delay = backoff_delay(policy.base_delay, attempt, sample_jitter(policy.jitter));
        attempts.push(record(attempt, started_at, policy, Some(&err), Some(delay)));
        debug!(
            label,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed; backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Exhausted {
                    label: label.to_string(),
                    attempts,
                    last_error: AttemptError::Cancelled,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
