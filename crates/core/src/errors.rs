//! Core error types for quantdesk.
//!
//! Errors from the market data and indicator crates are wrapped as-is so
//! callers can still match on the underlying variant.

use quantdesk_indicators::IndicatorError;
use quantdesk_market_data::MarketDataError;
use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the analysis facade.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Market data operation failed: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("Indicator computation failed: {0}")]
    Indicator(#[from] IndicatorError),

    #[error("Failed to load configuration: {0}")]
    ConfigIO(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// True when the failure came from the caller's input rather than from
    /// providers or storage.
    pub fn is_caller_error(&self) -> bool {
        match self {
            Self::MarketData(
                MarketDataError::UnsupportedDataset(_) | MarketDataError::InvalidParameters(_),
            ) => true,
            Self::Indicator(IndicatorError::UnknownIndicator(_)) => true,
            _ => false,
        }
    }
}
