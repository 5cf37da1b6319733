//! Application configuration.
//!
//! Loaded from TOML. Every section is optional and falls back to the
//! component defaults:
//!
//! ```toml
//! cache_dir = "/var/lib/quantdesk"
//! wait_timeout = 30000
//!
//! [cache]
//! memory_max_entries = 512
//! disk_max_bytes = 1073741824
//! sweep_interval = 300
//!
//! [cache.ttl]
//! minute_bars = 30
//!
//! [retry]
//! max_attempts = 4
//! base_delay = 250
//!
//! [health]
//! error_threshold = 3
//! check_interval = 60
//!
//! [rate_limit.TUSHARE]
//! tokens_per_interval = 200
//! interval = 60
//! burst_capacity = 20
//!
//! [providers.YAHOO]
//! priority = 1
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use quantdesk_market_data::{
    CacheConfig, HealthConfig, OrchestratorConfig, RateLimitConfig, RetryConfig,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::constants::{CACHE_DIR_ENV, CACHE_FILE_NAME};
use crate::errors::{Error, Result};

/// Per-provider settings under `[providers.<ID>]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Overrides the provider's declared priority. Lower runs first.
    pub priority: Option<i32>,
    pub enabled: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            priority: None,
            enabled: true,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory of the disk cache. Without one the disk tier lives in memory.
    pub cache_dir: Option<PathBuf>,
    /// Default bound on a caller's wait for an in-flight fetch.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub wait_timeout: Option<Duration>,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub rate_limit: HashMap<String, RateLimitConfig>,
    pub providers: HashMap<String, ProviderSettings>,
}

impl AppConfig {
    /// Parse a TOML document. Environment overrides are not applied.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, then apply environment overrides (a `.env` file in
    /// the working directory is honored).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        dotenvy::dotenv().ok();
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup` (an environment accessor).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(CACHE_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            info!("Cache directory overridden by {}: {}", CACHE_DIR_ENV, dir);
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.memory_max_entries == 0 {
            return Err(invalid("cache.memory_max_entries must be at least 1"));
        }
        if self.cache.disk_max_bytes == 0 {
            return Err(invalid("cache.disk_max_bytes must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(invalid("retry.base_delay exceeds retry.max_delay"));
        }
        if self.health.error_threshold == 0 {
            return Err(invalid("health.error_threshold must be at least 1"));
        }
        for (provider, limit) in &self.rate_limit {
            if limit.tokens_per_interval == 0 || limit.interval.is_zero() {
                return Err(invalid(&format!(
                    "rate_limit.{provider} must allow at least one request per non-zero interval"
                )));
            }
        }
        Ok(())
    }

    /// Path of the SQLite cache file, if a cache directory is configured.
    pub fn disk_cache_path(&self) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(CACHE_FILE_NAME))
    }

    /// Whether a provider should be registered. Unlisted providers are.
    pub fn is_enabled(&self, provider: &str) -> bool {
        self.providers.get(provider).map_or(true, |p| p.enabled)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retry: self.retry.clone(),
            rate_limits: self.rate_limit.clone(),
            priorities: self
                .providers
                .iter()
                .filter_map(|(id, settings)| settings.priority.map(|p| (id.clone(), p)))
                .collect(),
            wait_timeout: self.wait_timeout,
        }
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfigValue(message.to_string())
}
