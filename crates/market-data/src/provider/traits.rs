//! Market data provider trait definitions.
//!
//! This module defines the core `MarketDataProvider` trait that all
//! market data sources must implement.

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::{Bar, DatasetType, QueryParams};

use super::capabilities::{ProviderCapabilities, RateLimit};

/// Trait for market data providers.
///
/// Implement this trait to plug a new data source into the orchestrator.
/// The orchestrator uses the provider's capabilities, priority and health
/// to decide when and how to call it.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use quantdesk_market_data::provider::{MarketDataProvider, ProviderCapabilities};
///
/// struct MyProvider {
///     token: String,
/// }
///
/// #[async_trait]
/// impl MarketDataProvider for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities {
///             datasets: &[DatasetType::DailyBars],
///         }
///     }
///
///     // ... implement fetch
/// }
/// ```
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "TUSHARE", "AKSHARE", etc.
    /// Used for logging, health tracking and rate limiting.
    fn id(&self) -> &'static str;

    /// Provider priority for ordering.
    ///
    /// Lower values = higher priority. Default is 10.
    fn priority(&self) -> u8 {
        10
    }

    /// Describes which datasets this provider can serve.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Rate limit to apply when calling this provider, unless overridden
    /// in configuration.
    fn rate_limit(&self) -> RateLimit {
        RateLimit::default()
    }

    /// Fetch a series for `symbol` over `params`.
    ///
    /// Transport failures should be mapped onto [`MarketDataError`] variants
    /// so the orchestrator can classify them: `Timeout`/`Connection`/
    /// `RateLimited` for transient trouble, `Unauthorized`/`MalformedRequest`
    /// for rejections, `SymbolNotFound`/`NoDataForRange` for misses.
    ///
    /// Rows should be ordered by timestamp ascending; the orchestrator
    /// re-sorts and drops invalid rows regardless.
    async fn fetch(
        &self,
        dataset: DatasetType,
        symbol: &str,
        params: &QueryParams,
    ) -> Result<Vec<Bar>, MarketDataError>;

    /// Cheap liveness check used to bring an unavailable provider back.
    ///
    /// The default returns `Ok`, which means an unavailable provider is
    /// restored on the next probe cycle and re-evaluated on real traffic.
    async fn probe(&self) -> Result<(), MarketDataError> {
        Ok(())
    }
}
