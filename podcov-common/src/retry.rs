//! Retry utilities for tunnel establishment and relay probes.
//!
//! Provides a generic retry policy with exponential backoff and jitter,
//! and a helper to run async phases whose errors know whether they are
//! transient.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Errors that can be retried.
pub trait RetryableError {
    /// Whether a fresh attempt may succeed.
    fn is_retryable(&self) -> bool;
}

/// Retry policy with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts including the first try (minimum 1).
    pub max_attempts: u32,
    /// Base delay between retries (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) applied to delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Health polling before a fetch: five attempts, one second apart.
    pub fn health_probe() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        }
    }

    /// Calculate backoff delay for a given attempt (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_secs = self.base_delay.as_secs_f64();
        let max_secs = self.max_delay.as_secs_f64().max(0.0);

        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1)) as f64;
        let mut delay = (base_secs * multiplier).min(max_secs);

        if self.jitter > 0.0 && delay > 0.0 {
            let jitter = (fastrand::f64() * 2.0 - 1.0) * self.jitter;
            delay = (delay * (1.0 + jitter)).max(0.0);
        }

        Duration::from_secs_f64(delay)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run an async operation, retrying retryable errors with backoff.
pub async fn run_with_retry<F, Fut, T, E>(phase: &str, policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        debug!(phase, attempt, max_attempts, "Starting attempt");

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(phase, attempt, "Attempt succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff_delay(attempt);
                warn!(
                    phase,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed (retryable), backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(phase, attempt, error = %err, retryable = err.is_retryable(), "Giving up");
                return Err(err);
            }
        }
    }
}
