use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;

/// Category of time-series data with its own schema and cache lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    /// One bar per trading day.
    DailyBars,
    /// One bar per trading week.
    WeeklyBars,
    /// Intraday one-minute bars.
    MinuteBars,
    /// Periodic fundamentals (valuation ratios, share counts) keyed by report date.
    Fundamentals,
}

impl DatasetType {
    pub const ALL: [DatasetType; 4] = [
        DatasetType::DailyBars,
        DatasetType::WeeklyBars,
        DatasetType::MinuteBars,
        DatasetType::Fundamentals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyBars => "daily_bars",
            Self::WeeklyBars => "weekly_bars",
            Self::MinuteBars => "minute_bars",
            Self::Fundamentals => "fundamentals",
        }
    }

    /// Default cache lifetime. Intraday data goes stale much faster than
    /// end-of-day or fundamental data.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Self::DailyBars => Duration::from_secs(12 * 60 * 60),
            Self::WeeklyBars => Duration::from_secs(24 * 60 * 60),
            Self::MinuteBars => Duration::from_secs(60),
            Self::Fundamentals => Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetType {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MarketDataError::InvalidParameters(format!("unknown dataset '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_through_str() {
        for dataset in DatasetType::ALL {
            assert_eq!(dataset.as_str().parse::<DatasetType>().unwrap(), dataset);
        }
    }

    #[test]
    fn test_unknown_dataset_is_invalid_parameters() {
        let err = "tick_data".parse::<DatasetType>().unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidParameters(_)));
    }

    #[test]
    fn test_minute_bars_expire_before_daily_bars() {
        assert!(DatasetType::MinuteBars.default_ttl() < DatasetType::DailyBars.default_ttl());
        assert!(DatasetType::DailyBars.default_ttl() < DatasetType::Fundamentals.default_ttl());
    }
}
