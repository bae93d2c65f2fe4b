//! Intra-provider retry with exponential backoff.
//!
//! A failed call is retried against the same provider only while the error
//! classifies itself as transient. Delay before retry `n` (0-based) is
//! `base_delay * 2^n`, capped at `max_delay`. No jitter.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::errors::ProviderError;

/// Configuration for retry behavior with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (excluding initial attempt)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// `base_delay * 2^attempt`, saturating at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }
}

/// Trait for errors that can be classified as retryable or non-retryable
pub trait RetryableError {
    /// Returns true if the error is retryable (transient)
    fn is_retryable(&self) -> bool;

    /// Returns the error type for logging purposes
    fn error_type(&self) -> &'static str;
}

impl RetryableError for ProviderError {
    fn is_retryable(&self) -> bool {
        ProviderError::is_retryable(self)
    }

    fn error_type(&self) -> &'static str {
        ProviderError::error_type(self)
    }
}

/// Final error of a retry loop and how many calls were made.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, returns a non-retryable error, or the
/// retry budget is spent.
///
/// `operation` receives the 0-based attempt number. On success returns the
/// value together with the number of calls made.
pub async fn execute_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<(T, u32), RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        retries = attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "operation succeeded after retries"
                    );
                }
                return Ok((value, attempt + 1));
            }
            Err(error) => {
                if !error.is_retryable() {
                    debug!(
                        error = %error,
                        error_type = error.error_type(),
                        attempt = attempt + 1,
                        "non-retryable error, giving up"
                    );
                    return Err(RetryFailure {
                        error,
                        attempts: attempt + 1,
                    });
                }
                if attempt >= config.max_retries {
                    warn!(
                        error = %error,
                        error_type = error.error_type(),
                        attempts = attempt + 1,
                        "retries exhausted"
                    );
                    return Err(RetryFailure {
                        error,
                        attempts: attempt + 1,
                    });
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    error = %error,
                    error_type = error.error_type(),
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "operation failed, retrying"
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

    #[derive(Debug)]
    struct TestError {
        message: &'static str,
        is_retryable: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.message)
        }
    }

    impl RetryableError for TestError {
        fn is_retryable(&self) -> bool {
            self.is_retryable
        }

        fn error_type(&self) -> &'static str {
            "test_error"
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig::new()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_successful_operation_no_retry() {
        let result =
            execute_with_retry(&fast(), |_| async { Ok::<i32, TestError>(42) }).await;
        let (value, attempts) = result.expect("should succeed");
        assert_eq!(value, 42);
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_with_eventual_success() {
        let counter = AtomicU32::new(0);
        let result = execute_with_retry(&fast(), |_| {
            let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if count < 3 {
                    Err(TestError {
                        message: "temporary failure",
                        is_retryable: true,
                    })
                } else {
                    Ok(count)
                }
            }
        })
        .await;

        let (value, attempts) = result.expect("should eventually succeed");
        assert_eq!(value, 3);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error() {
        let counter = AtomicU32::new(0);
        let result: Result<(i32, u32), _> = execute_with_retry(&fast(), |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(TestError {
                    message: "permanent failure",
                    is_retryable: false,
                })
            }
        })
        .await;

        let failure = result.expect_err("should fail");
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.error.message, "permanent failure");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_retries_exceeded() {
        let config = fast().with_max_retries(2);
        let counter = AtomicU32::new(0);
        let result: Result<(i32, u32), _> = execute_with_retry(&config, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(TestError {
                    message: "always fails",
                    is_retryable: true,
                })
            }
        })
        .await;

        assert_eq!(result.expect_err("should fail").attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3); // Initial + 2 retries
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_slept_between_attempts() {
        let config = RetryConfig::new()
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(100));
        let started = tokio::time::Instant::now();

        let _: Result<((), u32), _> = execute_with_retry(&config, |_| async {
            Err(TestError {
                message: "down",
                is_retryable: true,
            })
        })
        .await;

        // 100ms + 200ms
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(310), "{elapsed:?}");
    }

    #[test]
    fn test_backoff_calculation() {
        let config = RetryConfig::new().with_base_delay(Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_max_delay_cap() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_millis(1000))
            .with_max_delay(Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(64), Duration::from_millis(2000));
    }

    #[test]
    fn test_provider_error_classification() {
        assert!(RetryableError::is_retryable(&ProviderError::from_status_code(503, "busy")));
        assert!(!RetryableError::is_retryable(&ProviderError::Authentication("bad key".into())));
    }
}
