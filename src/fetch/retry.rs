// Retry executor.
// Bounds each attempt with a timeout and backs off exponentially on failure.

use std::future::Future;
use std::time::Duration;

use tokio::time;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, StarhopError};

/// Backoff delays never grow past this.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Policy for executing one remote operation with retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay, doubled per attempt.
    pub base_delay: Duration,
    /// Budget for each individual attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_delay,
            timeout: config.fetch_timeout,
        }
    }

    /// Run `op` until it succeeds, its attempt budget expires, or retries run
    /// out.
    ///
    /// A timed-out attempt is dropped (aborting the in-flight request) and is
    /// terminal: the timeout surfaces immediately rather than being retried.
    /// Ordinary failures retry with delays of `base_delay * 2^attempt`; once
    /// retries are exhausted the last failure is surfaced.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match time::timeout(self.timeout, op()).await {
                Err(_) => {
                    warn!(attempt, timeout_ms = self.timeout.as_millis() as u64, "attempt timed out");
                    return Err(StarhopError::Timeout);
                }
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if attempt < self.max_retries => {
                    let delay = backoff_delay(attempt, self.base_delay);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, %err, "retrying after failure");
                    time::sleep(delay).await;
                    attempt += 1;
                }
                Ok(Err(err)) => {
                    warn!(attempts = attempt + 1, %err, "retries exhausted");
                    return Err(err);
                }
            }
        }
    }
}

/// Exponential backoff delay for a given attempt, capped.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(1u32 << attempt.min(31)).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_retries: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(base_ms),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(0, base), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, base), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, base), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let base = Duration::from_secs(10);
        assert_eq!(backoff_delay(30, base), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_needs_no_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = policy(3, 100)
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(7u32)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_call_retries_with_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let start = time::Instant::now();

        let result: Result<u32> = policy(3, 100)
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(StarhopError::Http(500))
                }
            })
            .await;

        // Initial attempt plus 3 retries, surfacing the original error.
        assert_eq!(result, Err(StarhopError::Http(500)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // Backoff slept 100 + 200 + 400 ms of virtual time.
        assert_eq!(start.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_on_second_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = policy(3, 100)
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(StarhopError::Http(502))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<u32> = policy(3, 100)
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    time::sleep(Duration::from_secs(30)).await;
                    Ok(0)
                }
            })
            .await;

        // No retry after a timeout.
        assert_eq!(result, Err(StarhopError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
