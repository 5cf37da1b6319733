//! Row validation for provider payloads.
//!
//! Checks each bar before it is cached:
//! - OHLC invariants (high >= low)
//! - Non-negative prices and volume
//! - Reasonable value ranges
//!
//! A series is then sorted chronologically with duplicate timestamps removed.

use log::{debug, warn};
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::Bar;

/// Validation severity levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationSeverity {
    /// Hard failure - the row is dropped.
    Hard,
    /// Soft warning - the row is kept.
    Soft,
}

/// A single problem found on a row.
#[derive(Clone, Debug)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub message: String,
}

impl ValidationIssue {
    fn hard(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Hard,
            message,
        }
    }

    fn soft(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Soft,
            message,
        }
    }
}

/// Bar validator configuration.
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Whether to reject rows with negative prices.
    pub reject_negative_prices: bool,
    /// Whether to reject rows where high < low.
    pub reject_invalid_ohlc: bool,
    /// Maximum allowed price value (for sanity check).
    pub max_price: Option<Decimal>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            reject_negative_prices: true,
            reject_invalid_ohlc: true,
            max_price: Some(Decimal::from(1_000_000_000i64)), // 1 billion as sanity check
        }
    }
}

/// Validates and normalizes provider payloads.
#[derive(Clone, Debug, Default)]
pub struct BarValidator {
    config: ValidatorConfig,
}

impl BarValidator {
    /// Create a new validator with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator with custom configuration.
    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Collect every issue found on one row.
    pub fn check(&self, bar: &Bar) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.config.reject_negative_prices {
            let prices = [
                ("close", Some(bar.close)),
                ("open", bar.open),
                ("high", bar.high),
                ("low", bar.low),
            ];
            for (name, value) in prices {
                if let Some(v) = value.filter(|v| *v < Decimal::ZERO) {
                    issues.push(ValidationIssue::hard(format!("Negative {} price: {}", name, v)));
                }
            }
        }

        if let Some(volume) = bar.volume.filter(|v| *v < Decimal::ZERO) {
            issues.push(ValidationIssue::hard(format!("Negative volume: {}", volume)));
        }

        if let (Some(high), Some(low)) = (bar.high, bar.low) {
            if self.config.reject_invalid_ohlc && high < low {
                issues.push(ValidationIssue::hard(format!(
                    "High ({}) is less than Low ({})",
                    high, low
                )));
            } else if bar.close < low || bar.close > high {
                issues.push(ValidationIssue::soft(format!(
                    "Close ({}) is outside High/Low range ({}-{})",
                    bar.close, low, high
                )));
            }
        }

        if let Some(max_price) = self.config.max_price {
            if bar.close > max_price {
                issues.push(ValidationIssue::soft(format!(
                    "Close price ({}) exceeds max threshold ({})",
                    bar.close, max_price
                )));
            }
        }

        issues
    }

    /// Validate a single row. Soft issues are accepted.
    pub fn validate(&self, bar: &Bar) -> Result<(), MarketDataError> {
        let hard: Vec<String> = self
            .check(bar)
            .into_iter()
            .filter(|i| i.severity == ValidationSeverity::Hard)
            .map(|i| i.message)
            .collect();

        if hard.is_empty() {
            Ok(())
        } else {
            Err(MarketDataError::ValidationFailed {
                message: hard.join("; "),
            })
        }
    }

    /// Drop invalid rows, sort by timestamp and keep the last row for each
    /// duplicated timestamp.
    ///
    /// An empty input is returned as-is; the caller decides whether that is
    /// "no data". A non-empty input in which every row is invalid fails with
    /// [`MarketDataError::ValidationFailed`].
    pub fn validate_series(
        &self,
        provider: &str,
        bars: Vec<Bar>,
    ) -> Result<Vec<Bar>, MarketDataError> {
        if bars.is_empty() {
            return Ok(bars);
        }

        let received = bars.len();
        let mut soft_warnings = 0usize;
        let mut first_rejection: Option<String> = None;
        let mut valid = Vec::with_capacity(received);

        for bar in bars {
            let issues = self.check(&bar);
            let hard = issues
                .iter()
                .find(|i| i.severity == ValidationSeverity::Hard);
            match hard {
                Some(issue) => {
                    if first_rejection.is_none() {
                        first_rejection = Some(format!("{}: {}", bar.timestamp, issue.message));
                    }
                }
                None => {
                    soft_warnings += issues.len();
                    valid.push(bar);
                }
            }
        }

        let rejected = received - valid.len();
        if valid.is_empty() {
            return Err(MarketDataError::ValidationFailed {
                message: format!(
                    "{}: all {} rows rejected (first: {})",
                    provider,
                    received,
                    first_rejection.unwrap_or_default()
                ),
            });
        }
        if rejected > 0 {
            warn!(
                "Validator: dropped {}/{} rows from '{}' (first: {})",
                rejected,
                received,
                provider,
                first_rejection.unwrap_or_default()
            );
        }
        if soft_warnings > 0 {
            debug!(
                "Validator: {} soft warnings on rows from '{}'",
                soft_warnings, provider
            );
        }

        // Stable sort keeps provider order among equal timestamps, so the
        // last one wins below.
        valid.sort_by_key(|b| b.timestamp);
        let mut deduped: Vec<Bar> = Vec::with_capacity(valid.len());
        for bar in valid {
            match deduped.last_mut() {
                Some(last) if last.timestamp == bar.timestamp => *last = bar,
                _ => deduped.push(bar),
            }
        }

        Ok(deduped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn day(d: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn bar(d: u32, close: Decimal) -> Bar {
        Bar::ohlcv(day(d), close, close + dec!(1), close - dec!(1), close, dec!(1000))
    }

    #[test]
    fn test_valid_bar_passes() {
        let validator = BarValidator::new();
        assert!(validator.validate(&bar(2, dec!(10.5))).is_ok());
    }

    #[test]
    fn test_close_only_bar_passes() {
        let validator = BarValidator::new();
        assert!(validator.validate(&Bar::new(day(2), dec!(10.5))).is_ok());
    }

    #[test]
    fn test_negative_close_fails() {
        let validator = BarValidator::new();
        let result = validator.validate(&Bar::new(day(2), dec!(-1)));
        assert!(matches!(result, Err(MarketDataError::ValidationFailed { .. })));
    }

    #[test]
    fn test_high_below_low_fails() {
        let validator = BarValidator::new();
        let mut b = bar(2, dec!(10));
        b.high = Some(dec!(8));
        b.low = Some(dec!(9));
        assert!(validator.validate(&b).is_err());
    }

    #[test]
    fn test_close_outside_range_is_soft() {
        let validator = BarValidator::new();
        let mut b = bar(2, dec!(10));
        b.close = dec!(20);
        let issues = validator.check(&b);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ValidationSeverity::Soft);
        assert!(validator.validate(&b).is_ok());
    }

    #[test]
    fn test_negative_volume_fails() {
        let validator = BarValidator::new();
        let mut b = bar(2, dec!(10));
        b.volume = Some(dec!(-5));
        assert!(validator.validate(&b).is_err());
    }

    #[test]
    fn test_series_is_sorted_and_deduplicated() {
        let validator = BarValidator::new();
        let rows = vec![
            bar(4, dec!(12)),
            bar(2, dec!(10)),
            bar(3, dec!(11)),
            bar(3, dec!(11.5)),
        ];

        let out = validator.validate_series("TEST", rows).unwrap();
        let closes: Vec<Decimal> = out.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![dec!(10), dec!(11.5), dec!(12)]);
    }

    #[test]
    fn test_series_drops_invalid_rows() {
        let validator = BarValidator::new();
        let rows = vec![bar(2, dec!(10)), Bar::new(day(3), dec!(-1)), bar(4, dec!(12))];

        let out = validator.validate_series("TEST", rows).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_series_with_only_invalid_rows_fails() {
        let validator = BarValidator::new();
        let rows = vec![Bar::new(day(2), dec!(-1)), Bar::new(day(3), dec!(-2))];

        let err = validator.validate_series("TEST", rows).unwrap_err();
        assert!(matches!(err, MarketDataError::ValidationFailed { .. }));
    }

    #[test]
    fn test_empty_series_passes_through() {
        let validator = BarValidator::new();
        assert!(validator.validate_series("TEST", Vec::new()).unwrap().is_empty());
    }
}
