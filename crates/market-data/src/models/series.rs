use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::bar::Bar;
use super::key::CacheKey;
use super::types::ProviderId;
use crate::cache::{CacheEntry, CacheTier};
use crate::registry::FetchDiagnostics;

/// Where a resolved series came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeriesSource {
    Memory,
    Disk,
    Provider(ProviderId),
}

impl From<CacheTier> for SeriesSource {
    fn from(tier: CacheTier) -> Self {
        match tier {
            CacheTier::Memory => Self::Memory,
            CacheTier::Disk => Self::Disk,
        }
    }
}

/// Result of [`ProviderOrchestrator::resolve`](crate::ProviderOrchestrator::resolve).
///
/// `stale` is set when every provider failed and an expired cache entry was
/// served instead; callers should surface that to the user.
#[derive(Clone, Debug)]
pub struct ResolvedSeries {
    pub key: CacheKey,
    pub bars: Arc<Vec<Bar>>,
    pub source: SeriesSource,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
    /// Provider attempts made while resolving (empty for cache hits).
    pub diagnostics: FetchDiagnostics,
}

impl ResolvedSeries {
    pub(crate) fn from_cache(entry: CacheEntry, tier: CacheTier, stale: bool) -> Self {
        Self {
            key: entry.key,
            bars: entry.payload,
            source: tier.into(),
            fetched_at: entry.fetched_at,
            stale,
            diagnostics: FetchDiagnostics::new(),
        }
    }

    pub fn is_from_cache(&self) -> bool {
        !matches!(self.source, SeriesSource::Provider(_))
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}
