use std::sync::Arc;

use chrono::{DateTime, Utc};
use quantdesk_indicators::{IndicatorReport, Selection};
use quantdesk_market_data::{
    Bar, DatasetType, QueryParams, ResolvedSeries, SeriesRequest, SeriesSource,
};
use serde::{Deserialize, Serialize};

/// One series plus the indicators to compute over it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub dataset: DatasetType,
    pub symbol: String,
    pub params: QueryParams,
    /// Indicator or group names. Empty selects every registered indicator.
    #[serde(default)]
    pub indicators: Vec<String>,
}

impl AnalysisRequest {
    pub fn new(dataset: DatasetType, symbol: impl Into<String>, params: QueryParams) -> Self {
        Self {
            dataset,
            symbol: symbol.into(),
            params,
            indicators: Vec::new(),
        }
    }

    pub fn with_indicators<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indicators = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn selection(&self) -> Selection {
        if self.indicators.is_empty() {
            Selection::All
        } else {
            Selection::only(self.indicators.iter().cloned())
        }
    }

    pub fn series_request(&self) -> SeriesRequest {
        SeriesRequest::new(self.dataset, self.symbol.clone(), self.params.clone())
    }
}

/// Whether the rows came from a live fetch or an unexpired cache entry, or
/// from an expired entry served because every provider failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Where the series came from and how current it is.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesInfo {
    pub dataset: DatasetType,
    pub symbol: String,
    /// `memory`, `disk`, or the provider id.
    pub source: String,
    pub freshness: Freshness,
    pub fetched_at: DateTime<Utc>,
    pub rows: usize,
    /// Provider ids called while resolving; empty for cache hits.
    pub providers_called: Vec<String>,
}

impl From<&ResolvedSeries> for SeriesInfo {
    fn from(series: &ResolvedSeries) -> Self {
        let source = match &series.source {
            SeriesSource::Memory => "memory".to_string(),
            SeriesSource::Disk => "disk".to_string(),
            SeriesSource::Provider(id) => id.to_string(),
        };
        let mut providers_called: Vec<String> = series
            .diagnostics
            .providers_called()
            .map(|id| id.to_string())
            .collect();
        providers_called.dedup();

        Self {
            dataset: series.key.dataset,
            symbol: series.key.symbol.to_string(),
            source,
            freshness: if series.stale {
                Freshness::Stale
            } else {
                Freshness::Fresh
            },
            fetched_at: series.fetched_at,
            rows: series.len(),
            providers_called,
        }
    }
}

/// Result of [`AnalysisServiceTrait::analyze`](super::AnalysisServiceTrait::analyze).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub series: SeriesInfo,
    pub indicators: IndicatorReport,
    #[serde(skip)]
    pub bars: Arc<Vec<Bar>>,
}

impl AnalysisResult {
    pub fn is_stale(&self) -> bool {
        self.series.freshness == Freshness::Stale
    }
}
