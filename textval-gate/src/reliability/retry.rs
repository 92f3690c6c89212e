//! Bounded retry with exponential or fixed backoff.
//!
//! Used where a collaborator is expected to become consistent shortly, such
//! as polling for an entitlement record that asynchronous provisioning has
//! not written yet. The language model call is never retried here.

use std::time::Duration;

use crate::GateError;

/// Configuration for retry behavior.
///
/// A `backoff_multiplier` of `1.0` gives a fixed delay between attempts.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use textval_gate::reliability::RetryPolicy;
///
/// // 3 attempts, 100ms initial delay doubling up to 5s
/// let policy = RetryPolicy::default();
///
/// // 3 attempts, 500ms apart
/// let polling = RetryPolicy::fixed(3, Duration::from_millis(500));
/// assert_eq!(polling.backoff_multiplier, 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default: 3)
    pub max_attempts: u32,
    /// Delay before the second attempt (default: 100ms)
    pub initial_delay: Duration,
    /// Upper bound for any single delay (default: 5s)
    pub max_delay: Duration,
    /// Growth factor applied per attempt (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom maximum attempts.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// Creates a policy with the same delay between every attempt.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, initial_delay: delay, max_delay: delay, backoff_multiplier: 1.0 }
    }

    /// Delay after the given zero-based attempt: `initial_delay * multiplier^attempt`,
    /// capped at `max_delay`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss, reason = "acceptable for duration calculations")]
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_precision_loss,
            clippy::cast_sign_loss,
            reason = "delay_ms is non-negative and capped below"
        )]
        let delay = Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64);
        delay.min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, `should_retry` rejects the error, or
/// `max_attempts` is exhausted.
///
/// A `max_attempts` of zero is treated as one.
///
/// # Examples
///
/// ```
/// use textval_gate::reliability::{RetryPolicy, retry_if};
///
/// # async fn example() {
/// let policy = RetryPolicy::with_max_attempts(5);
/// let result: Result<(), &str> = retry_if(&policy, || async { Err("fatal") }, |e| *e != "fatal").await;
/// assert_eq!(result, Err("fatal"));
/// # }
/// ```
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once all
/// attempts have failed.
pub async fn retry_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let retryable = should_retry(&error);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    retryable,
                    error = %error,
                    "Operation failed"
                );

                if !retryable || attempt + 1 >= max_attempts {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(delay_ms = delay.as_millis(), "Sleeping before retry");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Determines if a gate error is worth another attempt.
///
/// # Retryable Errors
///
/// - Missing entitlement record (provisioning may still be in flight)
/// - HTTP timeouts, connection failures and 5xx responses from a backend
///
/// Everything else is a permanent failure or a client error.
#[must_use]
pub fn is_retryable(error: &GateError) -> bool {
    match error {
        GateError::ProfileNotFound(_) => true,
        GateError::HttpError(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        _ => false,
    }
}
