//! Retry logic with exponential backoff for activity calls.
//!
//! Every outbound call a saga makes is wrapped in a [`RetryPolicy`]. Which
//! failures are worth re-attempting is decided by the call site, either via
//! a predicate or, for activities, by the [`ActivityFailure`] verdict.
//!
//! # Example
//!
//! ```rust
//! use wire_saga_runtime::retry::{RetryPolicy, retry_activity};
//! use wire_saga_core::ActivityFailure;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), ActivityFailure> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let ack = retry_activity(&policy, "initiate_wire", || async {
//!     Ok::<_, ActivityFailure>("accepted")
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use tokio::time::sleep;
use wire_saga_core::ActivityFailure;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: `Some(3)` (`None` retries forever)
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts, `None` for unbounded
    pub max_retries: Option<usize>,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }


    /// Whether another attempt is allowed after `retries_so_far` retries.
    #[must_use]
    pub fn allows_retry(&self, retries_so_far: usize) -> bool {
        self.max_retries.is_none_or(|max| retries_so_far < max)
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff: `initial_delay * multiplier ^ attempt`,
    /// capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Retry until the operation succeeds or fails non-retryably.
    #[must_use]
    pub const fn unbounded(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
        }
    }
}

/// Retry an async operation, re-attempting only errors `is_retryable` accepts.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once the
/// retry budget is spent.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            },
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(error = %err, "Error is not retryable, failing immediately");
                    return Err(err);
                }

                if !policy.allows_retry(attempt) {
                    tracing::error!(attempt, error = %err, "Operation failed after max retries");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

/// Retry an activity call, keyed on its [`ActivityFailure`] verdict.
///
/// Retryable failures are re-attempted with backoff. When the budget runs
/// out the last failure is returned [`exhausted`](ActivityFailure::exhausted),
/// so callers only ever see non-retryable failures.
///
/// # Errors
///
/// Returns a non-retryable [`ActivityFailure`].
pub async fn retry_activity<F, Fut, T>(
    policy: &RetryPolicy,
    activity: &'static str,
    mut operation: F,
) -> Result<T, ActivityFailure>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ActivityFailure>>,
{
    let mut attempts = 0_usize;

    let result = retry_with_predicate(
        policy,
        || {
            attempts += 1;
            if attempts > 1 {
                metrics::counter!("activity.retry.attempt", "activity" => activity).increment(1);
            }
            operation()
        },
        ActivityFailure::is_retryable,
    )
    .await;

    result.map_err(|failure| {
        if failure.is_retryable() {
            metrics::counter!("activity.retry.exhausted", "activity" => activity).increment(1);
            tracing::error!(activity, attempts, error = %failure, "Activity retries exhausted");
        }
        failure.exhausted()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(5))
            .build()
    }

    #[test]
    fn test_retry_policy_delay_calculation() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_retry_policy_max_delay_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(usize::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_unbounded_policy_always_allows_retry() {
        let policy = RetryPolicy::builder().unbounded().build();
        assert!(policy.allows_retry(10_000));

        let bounded = fast(2);
        assert!(bounded.allows_retry(1));
        assert!(!bounded.allows_retry(2));
        assert!(!fast(0).allows_retry(0));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast(3),
            || {
                let c = Arc::clone(&counter_clone);
                async move {
                    let attempt = c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 { Err(format!("Attempt {attempt} failed")) } else { Ok(42) }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast(2),
            || {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("Persistent failure")
                }
            },
            |_| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3); // Initial + 2 retries
    }

    #[tokio::test]
    async fn test_retry_activity_stops_on_non_retryable() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result: Result<(), _> = retry_activity(&fast(5), "initiate_wire", || {
            let c = Arc::clone(&counter_clone);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ActivityFailure::non_retryable("Authentication failed"))
            }
        })
        .await;

        assert_eq!(result, Err(ActivityFailure::non_retryable("Authentication failed")));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_activity_marks_exhausted_failure_non_retryable() {
        let result: Result<(), _> = retry_activity(&fast(1), "initiate_wire", || async {
            Err(ActivityFailure::retryable("Service unavailable"))
        })
        .await;

        let failure = result.unwrap_err();
        assert!(!failure.is_retryable());
        assert_eq!(failure.message, "retries exhausted: Service unavailable");
    }

    #[tokio::test]
    async fn test_retry_activity_recovers_from_transient_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_activity(&fast(3), "place_hold", || {
            let c = Arc::clone(&counter_clone);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ActivityFailure::retryable("connection refused"))
                } else {
                    Ok("tx-1")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("tx-1"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
