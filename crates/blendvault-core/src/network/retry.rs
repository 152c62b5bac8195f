//! Retry with exponential backoff and jitter.
//!
//! Transient network errors retry with exponential backoff up to a fixed
//! attempt cap. Rate-limit errors wait out the server-provided hint instead
//! of the computed backoff, pausing only the caller.

use crate::{Result, VaultError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::NetworkConfig::MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the retry following attempt `attempt` (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt as i32);
        let capped = (self.base_delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            // Multiply by a random factor in [0.5, 1.5): keeps the average
            // delay while spreading retries out.
            let factor = rand::rng().random_range(0.5..1.5);
            (capped * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(final_secs)
    }

    /// Delay for a failed attempt, honoring a rate-limit hint when present.
    fn delay_for(&self, attempt: u32, error: &VaultError) -> Duration {
        if let VaultError::RateLimited {
            retry_after_secs: Some(secs),
            ..
        } = error
        {
            return Duration::from_secs(*secs).min(self.max_delay);
        }
        self.calculate_delay(attempt)
    }
}

/// Retry an async operation while its error is retryable.
pub async fn retry_request<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", attempt + 1);
                }
                return Ok(value);
            }
            Err(e) => {
                if !e.is_retryable() {
                    debug!("Error is not retryable: {e}");
                    return Err(e);
                }
                if attempt + 1 >= config.max_attempts {
                    warn!(
                        "All {} retry attempts exhausted. Last error: {e}",
                        config.max_attempts
                    );
                    return Err(e);
                }

                let delay = config.delay_for(attempt, &e);
                warn!(
                    "Attempt {}/{} failed: {e}. Retrying in {:?}",
                    attempt + 1,
                    config.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
