//! Bounded exponential-backoff retry for transient failures.
//!
//! The policy is a generic decorator around any fallible async operation; it
//! consults [`GatewayError::is_retryable`] so auth and validation errors
//! always propagate on the first attempt.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{GatewayError, Result};

/// Backoff delay in seconds for the given zero-based attempt number.
///
/// `min(max_wait, base * 2^attempt)` with a symmetric jitter factor, floored
/// at 100ms.
pub fn compute_backoff(attempt: u32, base: f64, max_wait: f64, jitter: f64) -> f64 {
    let raw = (base * 2f64.powi(attempt as i32)).min(max_wait);
    let factor = if jitter > 0.0 {
        1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
    } else {
        1.0
    };
    (raw * factor).max(0.1)
}

/// Retry policy with a hard attempt ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub min_wait: f64,
    pub max_wait: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            min_wait: 1.0,
            max_wait: 10.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, min_wait: f64, max_wait: f64) -> Self {
        Self {
            attempts,
            min_wait,
            max_wait,
            jitter: 0.1,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(compute_backoff(attempt, self.min_wait, self.max_wait, self.jitter))
    }

    /// Run `op`, retrying transient errors up to the attempt ceiling.
    ///
    /// The final failure is returned unchanged so callers see the original
    /// error, not a retry wrapper.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.attempts.max(1) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        op = label,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_monotonic_without_jitter() {
        let mut prev = 0.0;
        for attempt in 0..6 {
            let delay = compute_backoff(attempt, 0.5, 30.0, 0.0);
            assert!(delay >= prev, "backoff decreased at attempt {}", attempt);
            assert!(delay <= 30.0);
            prev = delay;
        }
    }

    #[test]
    fn backoff_respects_cap() {
        assert_eq!(compute_backoff(20, 1.0, 30.0, 0.0), 30.0);
    }

    #[test]
    fn backoff_has_floor() {
        assert!(compute_backoff(0, 0.001, 30.0, 0.0) >= 0.1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            min_wait: 0.001,
            max_wait: 0.002,
            jitter: 0.0,
        };
        let calls = &calls;
        let out: Result<u32> = policy
            .run("test", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(GatewayError::Network("flaky".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_errors_are_never_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let calls = &calls;
        let out: Result<()> = policy
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Auth("401".into()))
            })
            .await;
        assert!(matches!(out, Err(GatewayError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_reraises_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            min_wait: 0.001,
            max_wait: 0.002,
            jitter: 0.0,
        };
        let calls = &calls;
        let out: Result<()> = policy
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::RateLimited("still throttled".into()))
            })
            .await;
        match out {
            Err(GatewayError::RateLimited(msg)) => assert_eq!(msg, "still throttled"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
