//! Exponential backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::errors::{MarketDataError, RetryClass};

/// Retry policy configuration.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per provider, including the first one.
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    /// Randomize each delay uniformly in `[0, delay]` (full jitter).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

/// Retries an operation on [`RetryClass::WithBackoff`] errors.
///
/// Any other error is returned immediately. When attempts run out the last
/// transient error is wrapped in [`MarketDataError::ProviderFetchFailed`].
#[derive(Clone, Debug, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Upper bound of the delay after failed attempt `attempt` (0-based):
    /// `min(base_delay * 2^attempt, max_delay)`.
    pub fn backoff_cap(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.config.base_delay.checked_mul(factor))
            .map_or(self.config.max_delay, |delay| delay.min(self.config.max_delay))
    }

    /// Delay to sleep after failed attempt `attempt`, with jitter applied if enabled.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let cap = self.backoff_cap(attempt);
        if !self.config.jitter {
            return cap;
        }
        let cap_ms = u64::try_from(cap.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=cap_ms))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 0-based attempt number.
    pub async fn execute<T, F, Fut>(&self, provider: &str, mut op: F) -> Result<T, MarketDataError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.retry_class() != RetryClass::WithBackoff {
                return Err(err);
            }

            attempt += 1;
            if attempt >= max_attempts {
                warn!(
                    "Retry: '{}' still failing after {} attempts: {}",
                    provider, attempt, err
                );
                return Err(MarketDataError::ProviderFetchFailed {
                    provider: provider.to_string(),
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }

            let delay = self.backoff_delay(attempt - 1);
            debug!(
                "Retry: '{}' attempt {}/{} failed ({}), retrying in {:?}",
                provider, attempt, max_attempts, err, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
