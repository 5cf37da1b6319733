//! Provider capabilities and rate limiting configuration.
//!
//! This module defines structures for describing what a market data provider
//! can do and how it should be rate-limited.

use std::time::Duration;

use crate::models::DatasetType;

/// Describes the capabilities of a market data provider.
///
/// Used by the orchestrator to decide which providers are eligible for a
/// given dataset.
#[derive(Clone, Debug)]
pub struct ProviderCapabilities {
    /// Datasets this provider can serve.
    pub datasets: &'static [DatasetType],
}

impl ProviderCapabilities {
    pub fn supports(&self, dataset: DatasetType) -> bool {
        self.datasets.contains(&dataset)
    }
}

/// Rate limiting configuration for a provider.
///
/// Expressed as a token bucket: `tokens_per_interval` tokens are added every
/// `interval`, up to `burst_capacity` banked tokens.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimit {
    /// Tokens replenished per interval.
    pub tokens_per_interval: u32,

    /// Replenishment interval.
    pub interval: Duration,

    /// Maximum number of banked tokens.
    pub burst_capacity: u32,
}

impl RateLimit {
    pub fn per_minute(requests: u32) -> Self {
        Self {
            tokens_per_interval: requests,
            interval: Duration::from_secs(60),
            burst_capacity: requests.clamp(1, 10),
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::per_minute(60)
    }
}
