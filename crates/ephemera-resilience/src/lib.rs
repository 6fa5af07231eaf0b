//! # ephemera-resilience
//!
//! The single retry wrapper every external call goes through.
//!
//! An operation is a zero-argument closure returning a future. Failures that
//! [`ServiceError::is_transient`] classifies as retryable are retried with
//! exponential backoff (doubling from `base_delay`, capped at `max_delay`,
//! optional uniform jitter). Anything else is returned on the spot. When the
//! attempts run out the caller gets [`ServiceError::TransientDependency`],
//! which names the operation but not the underlying failure.
//!
//! The backoff sleep happens on the calling task between attempts. Closures
//! must take their own locks inside the returned future so nothing is held
//! across a sleep.

use std::future::Future;
use std::time::Duration;

use ephemera_types::{Result, ServiceError};
use rand::Rng;
use tracing::{debug, warn};

/// Default attempt cap.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default first backoff delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default backoff ceiling.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Sample each delay uniformly from `[0, backoff]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Same delays, different attempt cap.
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    /// Backoff ceiling before the `attempt`-th retry (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay to sleep after the `attempt`-th failure.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff(attempt);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let millis = ceiling.as_millis().min(u128::from(u64::MAX)) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

/// Run `op` under `policy`.
///
/// `operation` is a short label used in logs and in the exhaustion error.
pub async fn call<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                if attempt >= max_attempts {
                    warn!(operation, attempts = attempt, error = %err, "retries exhausted");
                    return Err(ServiceError::TransientDependency {
                        operation: operation.to_string(),
                        attempts: attempt,
                    });
                }
                let delay = policy.delay_for(attempt);
                debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_twice_then_succeed() {
        let calls = AtomicU32::new(0);
        let result = call(&fast_policy(5), "flaky", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ServiceError::Dependency("hiccup".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.expect("success on third attempt"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_transient_dependency() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = call(&fast_policy(4), "always_down", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::Dependency("connection refused at 10.0.0.7".into()))
        })
        .await;
        assert!(
            matches!(
                &result,
                Err(ServiceError::TransientDependency { operation, attempts: 4 })
                    if operation == "always_down"
            ),
            "unexpected result: {result:?}"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = call(&fast_policy(5), "validate", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::validation("empty proof"))
        })
        .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = call(&fast_policy(0), "once", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::Dependency("down".into()))
        })
        .await;
        assert!(matches!(result, Err(ServiceError::TransientDependency { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);
        let _ = call(&fast_policy(3), "timed", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ServiceError::Dependency("down".into()))
        })
        .await;
        // 10ms + 20ms of backoff with jitter disabled.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(40), "elapsed {elapsed:?}");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = fast_policy(10);
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(4), Duration::from_millis(40));
        assert_eq!(policy.backoff(64), Duration::from_millis(40));
    }

    #[test]
    fn test_jitter_stays_under_ceiling() {
        let policy = RetryPolicy {
            jitter: true,
            ..fast_policy(10)
        };
        for attempt in 1..8 {
            assert!(policy.delay_for(attempt) <= policy.backoff(attempt));
        }
    }
}
