//! Token bucket rate limiter for market data providers.
//!
//! Implements per-provider rate limiting using the token bucket algorithm.
//! Each provider gets its own bucket with configurable capacity and refill rate.
//! Waiting is cooperative: callers sleep on the tokio timer, never spin.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tokio::time::Instant;

use crate::errors::MarketDataError;
use crate::provider::RateLimit;

/// Default acquire deadline before the wait is reported as a transient failure.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Token bucket for a single provider.
#[derive(Debug)]
struct TokenBucket {
    /// Current number of available tokens.
    tokens: f64,
    /// Last time the bucket was updated.
    last_update: Instant,
    /// Token refill rate (tokens per second).
    rate: f64,
    /// Maximum bucket capacity.
    capacity: f64,
}

impl TokenBucket {
    fn from_config(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst_capacity.max(1));
        let interval = config.interval.as_secs_f64();
        let rate = if interval > 0.0 {
            f64::from(config.tokens_per_interval) / interval
        } else {
            0.0
        };

        Self {
            tokens: capacity,
            last_update: Instant::now(),
            rate,
            capacity,
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    /// Try to acquire a token immediately.
    fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until a token becomes available, or `None` if the bucket never refills.
    fn time_until_available(&mut self) -> Option<Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            return Some(Duration::ZERO);
        }
        if self.rate <= 0.0 {
            return None;
        }
        let seconds_needed = (1.0 - self.tokens) / self.rate;
        Duration::try_from_secs_f64(seconds_needed).ok()
    }
}

/// Rate limiter configuration for a provider.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Tokens replenished per interval.
    pub tokens_per_interval: u32,
    /// Replenishment interval.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    /// Maximum banked tokens.
    #[serde(alias = "burst")]
    pub burst_capacity: u32,
    /// How long `acquire` may wait before giving up.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub acquire_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimit::default().into()
    }
}

impl From<RateLimit> for RateLimitConfig {
    fn from(limit: RateLimit) -> Self {
        Self {
            tokens_per_interval: limit.tokens_per_interval,
            interval: limit.interval,
            burst_capacity: limit.burst_capacity,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// Token bucket rate limiter for multiple providers.
///
/// Buckets are created on demand from the provider's configuration, falling
/// back to the limiter-wide default.
pub struct RateLimiter {
    /// Per-provider token buckets.
    buckets: Mutex<HashMap<String, TokenBucket>>,
    /// Per-provider configuration overrides.
    configs: Mutex<HashMap<String, RateLimitConfig>>,
    default_config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a new rate limiter with default settings.
    pub fn new() -> Self {
        Self::with_default(RateLimitConfig::default())
    }

    /// Create a rate limiter whose unconfigured providers use `config`.
    pub fn with_default(config: RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            configs: Mutex::new(HashMap::new()),
            default_config: config,
        }
    }

    /// Lock the buckets mutex, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is slightly incorrect rate
    /// limiting, which is better than panicking.
    fn lock_buckets(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter buckets mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Lock the configs mutex, recovering from poison if necessary.
    fn lock_configs(&self) -> MutexGuard<'_, HashMap<String, RateLimitConfig>> {
        self.configs.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter configs mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Configure rate limits for a specific provider.
    pub fn configure(&self, provider: &str, config: RateLimitConfig) {
        let mut configs = self.lock_configs();
        configs.insert(provider.to_string(), config);
        drop(configs); // Release configs lock before acquiring buckets lock

        // Reset the bucket if it already exists
        self.lock_buckets().remove(provider);
    }

    /// Effective configuration for a provider.
    pub fn config_for(&self, provider: &str) -> RateLimitConfig {
        self.lock_configs()
            .get(provider)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// Acquire a token for the given provider.
    ///
    /// Waits asynchronously until a token is available. If the wait would
    /// pass the provider's `acquire_timeout`, returns
    /// [`MarketDataError::RateLimited`] without consuming a token.
    pub async fn acquire(&self, provider: &str) -> Result<(), MarketDataError> {
        let timeout = self.config_for(provider).acquire_timeout;
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let wait_time = {
                let mut buckets = self.lock_buckets();
                let bucket = buckets
                    .entry(provider.to_string())
                    .or_insert_with(|| self.create_bucket(provider));

                if bucket.try_acquire() {
                    debug!("Rate limiter: acquired token for '{}'", provider);
                    return Ok(());
                }

                bucket.time_until_available()
            };

            let within_deadline = match (wait_time, deadline) {
                (Some(wait), Some(deadline)) => Instant::now()
                    .checked_add(wait)
                    .is_some_and(|ready| ready <= deadline),
                (Some(_), None) => true,
                (None, _) => false,
            };
            let Some(wait_time) = wait_time.filter(|_| within_deadline) else {
                debug!(
                    "Rate limiter: no token for '{}' within {:?}",
                    provider, timeout
                );
                return Err(MarketDataError::RateLimited {
                    provider: provider.to_string(),
                });
            };

            if wait_time > Duration::ZERO {
                debug!(
                    "Rate limiter: waiting {:?} for provider '{}'",
                    wait_time, provider
                );
                tokio::time::sleep(wait_time).await;
            }
        }
    }

    /// Try to acquire a token without waiting.
    ///
    /// Returns true if a token was acquired, false if rate limited.
    pub fn try_acquire(&self, provider: &str) -> bool {
        let mut buckets = self.lock_buckets();

        let bucket = buckets
            .entry(provider.to_string())
            .or_insert_with(|| self.create_bucket(provider));

        bucket.try_acquire()
    }

    /// Get the remaining tokens for a provider.
    pub fn remaining_tokens(&self, provider: &str) -> f64 {
        let mut buckets = self.lock_buckets();

        if let Some(bucket) = buckets.get_mut(provider) {
            bucket.refill();
            bucket.tokens
        } else {
            f64::from(self.config_for(provider).burst_capacity.max(1))
        }
    }

    /// Reset the rate limiter for a provider.
    pub fn reset(&self, provider: &str) {
        self.lock_buckets().remove(provider);
    }

    /// Create a bucket for a provider, using custom config if available.
    fn create_bucket(&self, provider: &str) -> TokenBucket {
        TokenBucket::from_config(&self.config_for(provider))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
