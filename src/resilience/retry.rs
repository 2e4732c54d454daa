//! Retry with exponential backoff.
//!
//! The first attempt runs immediately. After failed attempt `i` (counting
//! from zero) the policy sleeps `base_delay * 2^i` and tries again, up to
//! `max_attempts` retries. Sleeping yields to the runtime, so other tasks keep
//! running while one request backs off.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::PolicyError;

const BACKOFF_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Option<Duration>,
    /// Add up to 10% random delay on top of each backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: None,
            jitter: false,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff before the retry that follows failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = BACKOFF_MULTIPLIER.powi(attempt.min(i32::MAX as u32) as i32);
        let mut delay = self.base_delay.mul_f64(factor);
        if let Some(max) = self.max_delay {
            delay = delay.min(max);
        }

        if self.jitter {
            let jitter_range = delay.as_millis() as u64 / 10;
            if jitter_range > 0 {
                delay += Duration::from_millis(rand::thread_rng().gen_range(0..jitter_range));
            }
        }
        delay
    }

    /// Run `op` until it succeeds or the retry budget is spent.
    ///
    /// [`PolicyError::CircuitOpen`] is returned as is, without retrying.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, PolicyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PolicyError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                // Short-circuit rejections pass through untouched.
                Err(err) if err.is_circuit_open() => {
                    debug!(attempt, error = %err, "circuit open, not retrying");
                    return Err(err);
                }
                Err(err) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    let attempts = attempt + 1;
                    warn!(attempts, error = %err, "retries exhausted");
                    return Err(PolicyError::RetryExhausted {
                        attempts,
                        last: Box::new(err),
                    });
                }
            }
        }
    }
}

/// Shorthand for `RetryPolicy::new(max_attempts, base_delay).run(op)`.
pub async fn retry<T, F, Fut>(op: F, max_attempts: u32, base_delay: Duration) -> Result<T, PolicyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PolicyError>>,
{
    RetryPolicy::new(max_attempts, base_delay).run(op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn failing_then_ok(failures: u32, calls: Arc<AtomicU32>) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<&'static str, PolicyError>> + Send>> {
        move || {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(PolicyError::operation(format!("failure {}", n)))
                } else {
                    Ok("done")
                }
            })
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_cap_and_jitter() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300))
            .with_jitter(true);
        let delay = policy.delay_for(4);
        assert!(delay >= Duration::from_millis(300));
        assert!(delay < Duration::from_millis(330));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let base = Duration::from_millis(100);
        let started = Instant::now();

        let result = retry(failing_then_ok(2, Arc::clone(&calls)), 3, base).await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= base + base * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = RetryPolicy::new(2, Duration::from_millis(10))
            .run(failing_then_ok(u32::MAX, Arc::clone(&calls)))
            .await;

        match result {
            Err(PolicyError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last.to_string(), "operation failed: failure 2");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = Arc::clone(&calls);
        let result: Result<(), PolicyError> = RetryPolicy::new(3, Duration::from_millis(100))
            .run(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(PolicyError::CircuitOpen {
                        name: "downstream".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(PolicyError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry(failing_then_ok(1, Arc::clone(&calls)), 0, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PolicyError::RetryExhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
