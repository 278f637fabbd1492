//! Bounded retry for transient failures.
//!
//! Device opens, socket connects and progress writes all go through
//! [`retry`]. Exhausting the policy is reported to the caller, which decides
//! whether that means "degraded" or "error"; nothing here retries forever.
//!
//! ```text
//! attempt 1 ── fail ── sleep backoff(1) ── attempt 2 ── ... ── attempt N ── Err(last)
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Retry policy for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff multiplier (1.0 for a fixed interval).
    pub backoff_multiplier: f64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Fixed interval between a bounded number of attempts.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        Self {
            max_attempts,
            initial_backoff_ms: ms,
            backoff_multiplier: 1.0,
            max_backoff_ms: ms,
        }
    }

    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay before attempt number `attempt` (1-indexed; attempt 1 has none).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        if attempt <= 1 {
            return 0;
        }
        let delay =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 2);
        (delay as u64).min(self.max_backoff_ms)
    }

    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(attempt))
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    /// Default: 5 attempts, 1s apart.
    fn default() -> Self {
        Self::fixed(5, Duration::from_secs(1))
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// Returns the last error when every attempt failed.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(what, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < attempts => {
                let delay = policy.backoff_duration(attempt + 1);
                debug!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(what, attempts, error = %e, "Giving up after bounded retries");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 1000,
            backoff_multiplier: 3.0,
            max_backoff_ms: 5000,
        };
        assert_eq!(policy.backoff_ms(1), 0);
        assert_eq!(policy.backoff_ms(2), 1000);
        assert_eq!(policy.backoff_ms(3), 3000);
        assert_eq!(policy.backoff_ms(4), 5000); // capped
    }

    #[test]
    fn test_default_is_five_fixed_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 5);
        assert_eq!(policy.backoff_ms(2), 1000);
        assert_eq!(policy.backoff_ms(5), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = tokio::time::Instant::now();

        let result: Result<(), String> = retry(&RetryPolicy::default(), "test", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("refused".to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "refused");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_first_success() {
        let result: Result<u32, String> =
            retry(&RetryPolicy::default(), "test", |attempt| async move {
                if attempt < 3 {
                    Err(format!("attempt {attempt}"))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }
}
