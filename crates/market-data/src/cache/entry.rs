use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{Bar, CacheKey};

/// Which tier served a lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Disk,
}

/// One cached series.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Chronologically ordered rows.
    pub payload: Arc<Vec<Bar>>,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
    /// Size of the serialized payload.
    pub size_bytes: u64,
}

impl CacheEntry {
    /// Expiry instant. `None` when the TTL is too large to represent.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.fetched_at.checked_add_signed(ttl))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| now >= expires)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Result of a tiered lookup.
#[derive(Clone, Debug)]
pub enum CacheLookup {
    /// Within TTL.
    Fresh(CacheEntry, CacheTier),
    /// Expired but not yet swept.
    Stale(CacheEntry, CacheTier),
    Miss,
}

impl CacheLookup {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::models::{DatasetType, QueryParams};

    fn entry(ttl: Duration) -> CacheEntry {
        let params = QueryParams::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );
        CacheEntry {
            key: CacheKey::new(DatasetType::DailyBars, "AAPL", params).unwrap(),
            payload: Arc::new(Vec::new()),
            fetched_at: Utc::now(),
            ttl,
            size_bytes: 2,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let e = entry(Duration::from_secs(60));
        let expires = e.expires_at().unwrap();
        assert!(!e.is_expired_at(expires - chrono::Duration::seconds(1)));
        assert!(e.is_expired_at(expires));
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        assert!(entry(Duration::ZERO).is_expired());
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let e = entry(Duration::MAX);
        assert!(e.expires_at().is_none());
        assert!(!e.is_expired());
    }
}
