use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::dataset::DatasetType;
use super::types::Symbol;
use crate::errors::MarketDataError;

/// Price adjustment applied by the provider for splits and dividends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceAdjustment {
    #[default]
    None,
    /// Forward adjusted: history rescaled to today's price level.
    Forward,
    /// Backward adjusted: today rescaled to the listing price level.
    Backward,
}

impl PriceAdjustment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

/// Normalized query parameters shared by every dataset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryParams {
    /// First day of the requested range (inclusive).
    pub start: NaiveDate,
    /// Last day of the requested range (inclusive).
    pub end: NaiveDate,
    #[serde(default)]
    pub adjustment: PriceAdjustment,
}

impl QueryParams {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            adjustment: PriceAdjustment::None,
        }
    }

    pub fn with_adjustment(mut self, adjustment: PriceAdjustment) -> Self {
        self.adjustment = adjustment;
        self
    }

    pub fn validate(&self) -> Result<(), MarketDataError> {
        if self.start > self.end {
            return Err(MarketDataError::InvalidParameters(format!(
                "start date {} is after end date {}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// Identity of one cached series and of one in-flight fetch.
///
/// Built through [`CacheKey::new`], which trims and upper-cases the symbol so
/// that `"aapl "` and `"AAPL"` share a cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub dataset: DatasetType,
    pub symbol: Symbol,
    pub params: QueryParams,
}

impl CacheKey {
    pub fn new(
        dataset: DatasetType,
        symbol: &str,
        params: QueryParams,
    ) -> Result<Self, MarketDataError> {
        let normalized = symbol.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(MarketDataError::InvalidParameters(
                "symbol must not be empty".to_string(),
            ));
        }
        params.validate()?;

        Ok(Self {
            dataset,
            symbol: Arc::from(normalized),
            params,
        })
    }

    /// Stable textual form used as the disk tier's primary key.
    pub fn storage_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.dataset,
            self.symbol,
            self.params.start.format("%Y%m%d"),
            self.params.end.format("%Y%m%d"),
            self.params.adjustment.as_str()
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// One entry of a batch resolve.
#[derive(Clone, Debug)]
pub struct SeriesRequest {
    pub dataset: DatasetType,
    pub symbol: String,
    pub params: QueryParams,
}

impl SeriesRequest {
    pub fn new(dataset: DatasetType, symbol: impl Into<String>, params: QueryParams) -> Self {
        Self {
            dataset,
            symbol: symbol.into(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> QueryParams {
        QueryParams::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 28).unwrap(),
        )
    }

    #[test]
    fn test_symbol_is_normalized() {
        let a = CacheKey::new(DatasetType::DailyBars, " 600519.sh ", params()).unwrap();
        let b = CacheKey::new(DatasetType::DailyBars, "600519.SH", params()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn test_storage_key_format() {
        let key = CacheKey::new(
            DatasetType::DailyBars,
            "AAPL",
            params().with_adjustment(PriceAdjustment::Forward),
        )
        .unwrap();
        assert_eq!(key.storage_key(), "daily_bars:AAPL:20240102:20240628:forward");
    }

    #[test]
    fn test_distinct_params_produce_distinct_keys() {
        let plain = CacheKey::new(DatasetType::DailyBars, "AAPL", params()).unwrap();
        let adjusted = CacheKey::new(
            DatasetType::DailyBars,
            "AAPL",
            params().with_adjustment(PriceAdjustment::Backward),
        )
        .unwrap();
        let weekly = CacheKey::new(DatasetType::WeeklyBars, "AAPL", params()).unwrap();
        assert_ne!(plain, adjusted);
        assert_ne!(plain.storage_key(), weekly.storage_key());
    }

    #[test]
    fn test_empty_symbol_rejected() {
        let err = CacheKey::new(DatasetType::DailyBars, "   ", params()).unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidParameters(_)));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let inverted = QueryParams::new(params().end, params().start);
        let err = CacheKey::new(DatasetType::DailyBars, "AAPL", inverted).unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidParameters(_)));
    }

    #[test]
    fn test_key_serde_round_trip() {
        let key = CacheKey::new(DatasetType::MinuteBars, "tsla", params()).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let back: CacheKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
