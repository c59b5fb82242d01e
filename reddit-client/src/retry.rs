use research_core::{CoreError, ErrorExt, RedditApiError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::reddit()
    }
}

impl RetryConfig {
    pub fn reddit() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Single attempt, no waiting.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after the delay the server asked for
    RetryWithDelay(Duration),
    /// Permanent failure
    NoRetry,
}

pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    match error {
        // The cached token is dropped on 401, so one more attempt re-authenticates.
        CoreError::RedditApi(RedditApiError::InvalidToken) => RetryStrategy::Retry,
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { .. }) => error
            .retry_after()
            .map_or(RetryStrategy::Retry, RetryStrategy::RetryWithDelay),
        _ if error.is_retryable() => RetryStrategy::Retry,
        _ => RetryStrategy::NoRetry,
    }
}

/// Exponential backoff with jitter, capped at `max_delay_ms`.
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let multiplier = config.backoff_multiplier.powi(attempt as i32);
    let delay_ms = ((config.base_delay_ms as f64 * multiplier) as u64).min(config.max_delay_ms);

    let jitter_range = (delay_ms as f64 * config.jitter_factor) as u64;
    let jitter = if jitter_range > 0 {
        fastrand::u64(0..=jitter_range)
    } else {
        0
    };

    Duration::from_millis((delay_ms + jitter).min(config.max_delay_ms))
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!("{} succeeded after {} retries", operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    let has_attempts_left = attempt + 1 < self.config.max_attempts;
                    let delay = match get_retry_strategy(&error) {
                        RetryStrategy::Retry if has_attempts_left => {
                            calculate_delay(attempt, &self.config)
                        }
                        RetryStrategy::RetryWithDelay(delay) if has_attempts_left => {
                            delay.min(Duration::from_millis(self.config.max_delay_ms))
                        }
                        RetryStrategy::NoRetry => {
                            debug!("Not retrying {}: {}", operation_name, error);
                            return Err(error);
                        }
                        _ => {
                            warn!(
                                "{} failed after {} attempts: {}",
                                operation_name,
                                attempt + 1,
                                error
                            );
                            return Err(error);
                        }
                    };

                    info!("Retrying {} in {:?} due to: {}", operation_name, delay, error);
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_retry_strategy_classification() {
        let server = CoreError::RedditApi(RedditApiError::ServerError { status_code: 503 });
        assert_eq!(get_retry_strategy(&server), RetryStrategy::Retry);

        let limited = CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 3 });
        assert_eq!(
            get_retry_strategy(&limited),
            RetryStrategy::RetryWithDelay(Duration::from_secs(3))
        );

        let missing = CoreError::RedditApi(RedditApiError::PostNotFound {
            post_id: "abc".to_string(),
        });
        assert_eq!(get_retry_strategy(&missing), RetryStrategy::NoRetry);
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::reddit();
        assert!(calculate_delay(0, &config) >= Duration::from_millis(2000));
        assert!(calculate_delay(10, &config) <= Duration::from_millis(config.max_delay_ms));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let executor = RetryExecutor::new(fast_config(3));
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let result = executor
            .execute("flaky", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CoreError::RedditApi(RedditApiError::RequestTimeout))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_server_requested_delay_is_capped() {
        let executor = RetryExecutor::new(fast_config(2));
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            executor.execute("limited", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CoreError::RedditApi(RedditApiError::RateLimitExceeded {
                        retry_after: 60,
                    }))
                } else {
                    Ok("listing")
                }
            }),
        )
        .await
        .expect("retry waited for the full server delay");

        assert_eq!(result.unwrap(), "listing");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let executor = RetryExecutor::new(fast_config(3));
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let result: Result<(), _> = executor
            .execute("missing", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::RedditApi(RedditApiError::PostNotFound {
                    post_id: "abc".to_string(),
                }))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let executor = RetryExecutor::new(fast_config(2));
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let result: Result<(), _> = executor
            .execute("down", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::RedditApi(RedditApiError::ServerError { status_code: 502 }))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
