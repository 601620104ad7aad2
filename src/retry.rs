use crate::error::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Exponential backoff with jitter for retryable node errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 0.0 to 1.0
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 200,
            max_backoff_ms: 5000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp_backoff = (self.base_backoff_ms as f64) * 2_f64.powi(attempt as i32);
        let capped = exp_backoff.min(self.max_backoff_ms as f64);

        let jitter_range = capped * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempts run out.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let delay = config.backoff(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable error, backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            base_backoff_ms: 100,
            max_backoff_ms: 1000,
            jitter_factor: 0.0,
        };
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(400));
        assert_eq!(config.backoff(8), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors() {
        let calls = &AtomicU32::new(0);
        let result = retry_with_backoff("token", &RetryConfig::default(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LedgerError::NodeOverloaded("429".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_errors_fail_fast() {
        let calls = &AtomicU32::new(0);
        let config = RetryConfig::default();
        let result: Result<()> = retry_with_backoff("submit", &config, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::ProgramExecutionError { code: 1 })
        })
        .await;

        assert_eq!(result, Err(LedgerError::ProgramExecutionError { code: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        };
        let result: Result<()> = retry_with_backoff("token", &config, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::NodeUnreachable("refused".into()))
        })
        .await;

        assert!(matches!(result, Err(LedgerError::NodeUnreachable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
