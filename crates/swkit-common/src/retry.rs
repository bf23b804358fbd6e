//! Retry and timeout utilities.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::TimedOut;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Exponential backoff with the given number of attempts.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::none()
        }
    }

    /// Calculate delay for a given attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let base_ms =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 2) as i32);
        let base_ms = if base_ms.is_nan() {
            0.0
        } else {
            base_ms.clamp(0.0, self.max_delay_ms as f64)
        };
        let delay = Duration::from_secs_f64(base_ms / 1000.0);

        if self.jitter {
            let jitter = delay.as_secs_f64() * (rand_jitter() * 0.25);
            delay + Duration::from_secs_f64(jitter)
        } else {
            delay
        }
    }
}

/// Pseudo-random value in `0.0..=1.0` from the clock's sub-second nanos.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos as f64) / (u32::MAX as f64)
}

/// Retry a fallible async operation with exponential backoff.
///
/// Returns the last error once `max_attempts` is exhausted.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                warn!(attempt, max_attempts, error = %e, "Operation failed, retrying");
            }
        }

        attempt += 1;
        let delay = config.delay_for_attempt(attempt);
        debug!(attempt, ?delay, "Retrying after delay");
        sleep(delay).await;
    }
}

/// Run an operation with a deadline.
pub async fn with_timeout<T, Fut>(timeout: Duration, operation: Fut) -> Result<T, TimedOut>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| TimedOut(timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retry_config_default_is_single_attempt() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn test_exponential_clamps_to_one_attempt() {
        assert_eq!(RetryConfig::exponential(0).max_attempts, 1);
        assert_eq!(RetryConfig::exponential(4).max_attempts, 4);
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig {
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter: false,
            ..RetryConfig::exponential(5)
        };

        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_respects_max() {
        let config = RetryConfig {
            initial_delay_ms: 10_000,
            max_delay_ms: 15_000,
            backoff_multiplier: 2.0,
            jitter: false,
            ..RetryConfig::exponential(3)
        };

        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(15));
    }

    #[test]
    fn test_delay_with_bad_multiplier_stays_in_range() {
        let negative = RetryConfig {
            backoff_multiplier: -2.0,
            jitter: false,
            ..RetryConfig::exponential(3)
        };
        assert_eq!(negative.delay_for_attempt(3), Duration::ZERO);

        let nan = RetryConfig {
            backoff_multiplier: f64::NAN,
            ..negative.clone()
        };
        assert_eq!(nan.delay_for_attempt(3), Duration::ZERO);

        let huge = RetryConfig {
            backoff_multiplier: f64::INFINITY,
            ..negative
        };
        assert_eq!(huge.delay_for_attempt(3), Duration::from_millis(5_000));
    }

    #[test]
    fn test_retry_config_deserializes_partial() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_attempts": 3}"#).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay_ms, 200);
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let config = RetryConfig::exponential(3);
        let mut attempts = 0;

        let result: Result<i32, &str> = retry_with_backoff(&config, || {
            attempts += 1;
            async { Ok(42) }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let config = RetryConfig {
            initial_delay_ms: 1,
            jitter: false,
            ..RetryConfig::exponential(3)
        };

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<i32, &str> = retry_with_backoff(&config, || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err("not yet")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let config = RetryConfig {
            initial_delay_ms: 1,
            jitter: false,
            ..RetryConfig::exponential(2)
        };
        let mut attempts = 0;

        let result: Result<i32, String> = retry_with_backoff(&config, || {
            attempts += 1;
            let n = attempts;
            async move { Err(format!("failure {n}")) }
        })
        .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_timeout() {
        let result = with_timeout(Duration::from_millis(10), async {
            sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert_eq!(result, Err(TimedOut(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_timeout_passes_value_through() {
        let result = with_timeout(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }
}
