//! Gateway retry policy.
//!
//! Only transient errors are retried: exponential backoff with factor 2,
//! ±25% jitter, a 10 second cap, and at most 3 attempts. Everything else
//! returns to the caller unchanged on the first failure.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use chomp_core::{ChompError, ChompResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub jitter: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            factor: 2,
            jitter: 0.25,
            cap: Duration::from_secs(10),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `n` (1-based; attempt 1 has no delay).
    fn delay_before(&self, attempt: u32) -> Duration {
        let exp = self.factor.saturating_pow(attempt.saturating_sub(2));
        let base = self.base_delay.saturating_mul(exp).min(self.cap);
        let spread = base.as_secs_f64() * self.jitter;
        let jittered = base.as_secs_f64() + rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64(jittered.max(0.0)).min(self.cap)
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> ChompResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ChompResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_before(attempt + 1);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_up_to_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: ChompResult<()> = fast_policy()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ChompError::Transient("socket reset".to_string())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn success_on_second_attempt_stops_retrying() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ChompError::Transient("timeout".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn logical_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ChompResult<()> = fast_policy()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ChompError::Validation("bad payload".to_string())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_are_capped_and_jittered() {
        let policy = RetryPolicy::default();
        for attempt in 2..=20 {
            let d = policy.delay_before(attempt);
            assert!(d <= policy.cap);
        }
        let second = policy.delay_before(2);
        let lower = policy.base_delay.as_secs_f64() * 0.75;
        let upper = policy.base_delay.as_secs_f64() * 1.25;
        assert!(second.as_secs_f64() >= lower && second.as_secs_f64() <= upper);
    }
}
