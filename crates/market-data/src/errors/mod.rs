//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use thiserror::Error;

use crate::models::DatasetType;
use crate::registry::FetchDiagnostics;

/// Errors that can occur during market data operations.
///
/// Errors are `Clone` because a single fetch outcome is handed to every caller
/// waiting on the same in-flight request.
///
/// Each variant is classified into a [`RetryClass`] via the [`retry_class`](Self::retry_class)
/// method, which determines how the orchestrator should handle the error.
#[derive(Error, Debug, Clone)]
pub enum MarketDataError {
    /// The provider throttled the request (HTTP 429), or our own rate limiter
    /// could not hand out a token before its deadline.
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
    },

    /// The request to the provider timed out.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// Transport-level failure (connection refused/reset, 5xx).
    #[error("Connection error: {provider} - {message}")]
    Connection {
        provider: String,
        message: String,
    },

    /// Credentials were rejected by the provider.
    #[error("Unauthorized: {provider} - {message}")]
    Unauthorized {
        provider: String,
        message: String,
    },

    /// The provider refused the request as malformed.
    #[error("Malformed request: {provider} - {message}")]
    MalformedRequest {
        provider: String,
        message: String,
    },

    /// The requested symbol is unknown to this provider.
    #[error("Symbol not found: {symbol} ({provider})")]
    SymbolNotFound {
        provider: String,
        symbol: String,
    },

    /// The symbol exists but the provider has no rows in the requested range.
    #[error("No data for date range: {provider}")]
    NoDataForRange {
        provider: String,
    },

    /// The provider returned data that failed validation checks.
    #[error("Validation failed: {message}")]
    ValidationFailed {
        /// Description of the validation failure
        message: String,
    },

    /// A provider kept failing with transient errors until retries ran out.
    #[error("Provider {provider} failed after {attempts} attempts: {last_error}")]
    ProviderFetchFailed {
        provider: String,
        attempts: u32,
        last_error: Box<MarketDataError>,
    },

    /// No registered provider can serve this dataset.
    #[error("Unsupported dataset: {0}")]
    UnsupportedDataset(DatasetType),

    /// The request was rejected before any work was done.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Every eligible provider was tried and no cached copy exists.
    #[error("All providers exhausted for {key}: {diagnostics}")]
    AllProvidersExhausted {
        key: String,
        diagnostics: FetchDiagnostics,
    },

    /// A caller gave up waiting on an in-flight fetch.
    #[error("Timed out waiting for in-flight fetch of {key}")]
    WaitTimeout { key: String },

    /// The task performing a shared fetch went away without publishing a result.
    #[error("In-flight fetch of {key} was abandoned")]
    FetchAbandoned { key: String },

    /// Cache storage or (de)serialization failure.
    #[error("Cache error: {0}")]
    Cache(String),
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use quantdesk_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::RateLimited { provider: "TUSHARE".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = MarketDataError::InvalidParameters("start after end".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            // Transient errors - retry with backoff
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Connection { .. } => {
                RetryClass::WithBackoff
            }

            // Provider rejected us - demote and move on
            Self::Unauthorized { .. }
            | Self::MalformedRequest { .. }
            | Self::ValidationFailed { .. } => RetryClass::FailoverWithPenalty,

            // Provider-scoped misses - try next provider
            Self::SymbolNotFound { .. }
            | Self::NoDataForRange { .. }
            | Self::ProviderFetchFailed { .. } => RetryClass::NextProvider,

            Self::UnsupportedDataset(_)
            | Self::InvalidParameters(_)
            | Self::AllProvidersExhausted { .. }
            | Self::WaitTimeout { .. }
            | Self::FetchAbandoned { .. }
            | Self::Cache(_) => RetryClass::Never,
        }
    }
}

impl From<rusqlite::Error> for MarketDataError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        Self::Cache(format!("serialization: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_retry_with_backoff() {
        let errors = [
            MarketDataError::RateLimited {
                provider: "TUSHARE".to_string(),
            },
            MarketDataError::Timeout {
                provider: "AKSHARE".to_string(),
            },
            MarketDataError::Connection {
                provider: "AKSHARE".to_string(),
                message: "connection reset by peer".to_string(),
            },
        ];
        for error in errors {
            assert_eq!(error.retry_class(), RetryClass::WithBackoff, "{}", error);
        }
    }

    #[test]
    fn test_rejections_fail_over_with_penalty() {
        let error = MarketDataError::Unauthorized {
            provider: "TUSHARE".to_string(),
            message: "token expired".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);

        let error = MarketDataError::ValidationFailed {
            message: "every row had a non-positive close".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
    }

    #[test]
    fn test_provider_misses_try_next_provider() {
        let error = MarketDataError::SymbolNotFound {
            provider: "TUSHARE".to_string(),
            symbol: "ZZZZ".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::NextProvider);

        let error = MarketDataError::NoDataForRange {
            provider: "TUSHARE".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::NextProvider);

        let error = MarketDataError::ProviderFetchFailed {
            provider: "AKSHARE".to_string(),
            attempts: 3,
            last_error: Box::new(MarketDataError::Timeout {
                provider: "AKSHARE".to_string(),
            }),
        };
        assert_eq!(error.retry_class(), RetryClass::NextProvider);
    }

    #[test]
    fn test_request_errors_never_retry() {
        let error = MarketDataError::UnsupportedDataset(DatasetType::Fundamentals);
        assert_eq!(error.retry_class(), RetryClass::Never);
        assert!(!error.retry_class().allows_failover());

        let error = MarketDataError::InvalidParameters("start after end".to_string());
        assert_eq!(error.retry_class(), RetryClass::Never);

        let error = MarketDataError::WaitTimeout {
            key: "daily_bars:AAPL".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::Never);
    }

    #[test]
    fn test_error_display() {
        let error = MarketDataError::RateLimited {
            provider: "TUSHARE".to_string(),
        };
        assert_eq!(format!("{}", error), "Rate limited: TUSHARE");

        let error = MarketDataError::ProviderFetchFailed {
            provider: "AKSHARE".to_string(),
            attempts: 3,
            last_error: Box::new(MarketDataError::Timeout {
                provider: "AKSHARE".to_string(),
            }),
        };
        assert_eq!(
            format!("{}", error),
            "Provider AKSHARE failed after 3 attempts: Timeout: AKSHARE"
        );

        let error = MarketDataError::UnsupportedDataset(DatasetType::MinuteBars);
        assert_eq!(format!("{}", error), "Unsupported dataset: minute_bars");
    }

    #[test]
    fn test_rusqlite_error_maps_to_cache() {
        let error: MarketDataError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(error, MarketDataError::Cache(_)));
    }
}
