//! Retry helper with exponential backoff and jitter (C3).
//!
//! A retry sequence is meant to run *inside* one [`crate::Breaker::execute`]
//! call (spec §4.3) — `retry` itself has no breaker awareness; callers
//! compose `breaker.execute(|| retry(...))`.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the Nth retry attempt (1-indexed), with jitter in
    /// [0.5, 1.5] applied uniformly.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.factor.powi(attempt as i32 - 1);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(exp * jitter)
    }
}

/// Runs `op`, retrying per `policy` whenever `is_retryable(&err)` returns
/// true. Non-retryable errors propagate immediately on the first attempt.
pub async fn retry<F, Fut, T, E>(
    policy: RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if attempt >= policy.attempts || !is_retryable(&e) {
                    return Err(e);
                }
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(1),
            factor: 1.0,
        };
        let result = retry(policy, |_: &&str| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<(), &str> = retry(policy, |_| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("fatal: bad request") }
        })
        .await;
        assert_eq!(result, Err("fatal: bad request"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_then_propagates() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            factor: 1.0,
        };
        let result: Result<(), &str> = retry(policy, |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("503 service unavailable") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
