//! Analysis service traits.

use async_trait::async_trait;
use quantdesk_market_data::{CacheStats, ProviderDescriptor, ResolvedSeries, SeriesRequest};

use super::model::{AnalysisRequest, AnalysisResult};
use crate::errors::Result;

/// Facade the application talks to: resolve a series, compute indicators
/// over it, and inspect or reset the state behind it.
#[async_trait]
pub trait AnalysisServiceTrait: Send + Sync {
    /// Resolve the series and compute the requested indicators.
    ///
    /// Unknown indicator names fail before any provider is called.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult>;

    /// Analyze several requests concurrently. Results are in request order.
    async fn analyze_many(&self, requests: &[AnalysisRequest]) -> Vec<Result<AnalysisResult>>;

    /// Resolve a series without computing indicators.
    async fn resolve(&self, request: &SeriesRequest) -> Result<ResolvedSeries>;

    fn provider_health(&self) -> Vec<ProviderDescriptor>;

    /// Drop the cached entry for a request. Returns whether one existed.
    fn invalidate(&self, request: &SeriesRequest) -> Result<bool>;

    fn cache_stats(&self) -> Result<CacheStats>;

    /// Names of every indicator that can be requested.
    fn available_indicators(&self) -> Vec<String>;
}
