use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use crate::models::DatasetType;

/// Per-dataset TTL overrides. Unset datasets use [`DatasetType::default_ttl`].
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub daily_bars: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub weekly_bars: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub minute_bars: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub fundamentals: Option<Duration>,
}

impl TtlPolicy {
    pub fn ttl_for(&self, dataset: DatasetType) -> Duration {
        let configured = match dataset {
            DatasetType::DailyBars => self.daily_bars,
            DatasetType::WeeklyBars => self.weekly_bars,
            DatasetType::MinuteBars => self.minute_bars,
            DatasetType::Fundamentals => self.fundamentals,
        };
        configured.unwrap_or_else(|| dataset.default_ttl())
    }
}

/// Tiered cache configuration.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry count bound of the memory tier.
    pub memory_max_entries: usize,
    /// Aggregate payload size bound of the disk tier.
    pub disk_max_bytes: u64,
    /// Interval of the background expiry sweep.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sweep_interval: Duration,
    pub ttl: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_entries: 256,
            disk_max_bytes: 256 * 1024 * 1024,
            sweep_interval: Duration::from_secs(300),
            ttl: TtlPolicy::default(),
        }
    }
}
