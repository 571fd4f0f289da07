//! Bounded retry with exponential backoff.
//!
//! Only transient errors are retried: the error type reports retryability
//! through [`Retryable`], and everything else fails immediately. The policy
//! is shared by the store adapter, the inventory client and the updater, so
//! the whole service degrades uniformly when a collaborator flaps.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Marks an error as transient (worth retrying) or permanent.
pub trait Retryable {
    /// Whether the operation that produced this error may succeed on retry.
    fn is_transient(&self) -> bool;
}

/// Retry policy: attempt count and backoff shape.
///
/// The default mirrors the inventory channel policy: 5 attempts, 2 s initial
/// backoff doubling up to 15 s, with jitter so concurrent workers do not
/// retry in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single backoff.
    pub max_backoff: Duration,
    /// Multiplier applied to the backoff after each failed attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(15),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries. Used where the caller handles failures
    /// itself (e.g. revision conflicts, which must surface immediately).
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before attempt `n` (1-based; attempt 1 has no backoff).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = self
            .initial_backoff
            .as_secs_f64()
            * self.multiplier.powi(attempt as i32 - 2);
        let capped = exp.min(self.max_backoff.as_secs_f64());
        // Up to 20% jitter, subtractive so the cap holds.
        let jitter = rand::thread_rng().gen_range(0.0..=0.2) * capped;
        Duration::from_secs_f64(capped - jitter)
    }
}

/// Runs `op`, retrying transient failures according to `policy`.
///
/// Returns the first success, the first permanent error, or the last
/// transient error once attempts are exhausted.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let backoff = policy.backoff_for(attempt);
        if !backoff.is_zero() {
            tokio::time::sleep(backoff).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    %err,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "{label}: transient failure, retrying"
                );
            }
            Err(err) => return Err(err),
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error (transient={})", self.transient)
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, TestError> =
            with_retry(RetryPolicy::default(), "test", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TestError { transient: true })
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_fails_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TestError> =
            with_retry(RetryPolicy::default(), "test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError { transient: false })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_on_persistent_transient_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TestError> =
            with_retry(RetryPolicy::default(), "test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError { transient: true })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn backoff_is_capped_and_grows() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::ZERO);
        let b2 = policy.backoff_for(2);
        assert!(b2 <= Duration::from_secs(2));
        let b5 = policy.backoff_for(5);
        assert!(b5 <= policy.max_backoff);
    }
}
