//! Retry with linear backoff
//!
//! Waits `base_delay * attempt` between attempts. There is no jitter and no
//! cap on the delay, so pick `max_attempts` with the total wait in mind.

use crate::config::RetryConfig;
use crate::error::{Result, SentinelError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `operation` until it succeeds and `is_acceptable` approves the result
    pub async fn run<T, F, Fut, A>(&self, mut operation: F, is_acceptable: A) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        A: Fn(&T) -> bool,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            let outcome = match operation().await {
                Ok(value) if is_acceptable(&value) => return Ok(value),
                Ok(_) => SentinelError::Rejected("acceptance check returned false".to_string()),
                Err(e) => e,
            };

            warn!(
                "Attempt {}/{} failed: {}",
                attempt, self.max_attempts, outcome
            );
            last_error = Some(outcome);

            if attempt < self.max_attempts {
                let delay = self.backoff(attempt);
                debug!("Retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
        }

        Err(SentinelError::RetryExhausted {
            attempts: self.max_attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| SentinelError::Rejected("no attempts made".to_string())),
            ),
        })
    }
}

/// Retry `operation` with the default policy and an acceptance check
pub async fn with_retry<T, F, Fut, A>(operation: F, is_acceptable: A) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    A: Fn(&T) -> bool,
{
    RetryPolicy::default().run(operation, is_acceptable).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_first_success_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, SentinelError>(7)
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_acceptable() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = tokio::time::Instant::now();

        let result = with_retry(
            || {
                let counter = counter.clone();
                async move { Ok::<_, SentinelError>(counter.fetch_add(1, Ordering::SeqCst) + 1) }
            },
            |n| *n >= 3,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = policy
            .run(
                || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        Err(SentinelError::Model(format!("boom {}", n)))
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(SentinelError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source.to_string(), "Model error: boom 3");
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }
}
