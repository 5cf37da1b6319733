//! Analysis service implementation.
//!
//! Wires the provider orchestrator (cache, coalescing, failover) to the
//! indicator engine.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use quantdesk_indicators::{IndicatorEngine, Selection};
use quantdesk_market_data::registry::MaintenanceHandles;
use quantdesk_market_data::{
    CacheStats, HealthMonitor, MarketDataProvider, ProviderDescriptor, ProviderOrchestrator,
    ResolvedSeries, SeriesRequest, TieredCache,
};

use super::model::{AnalysisRequest, AnalysisResult, SeriesInfo};
use super::traits::AnalysisServiceTrait;
use crate::config::AppConfig;
use crate::errors::Result;

/// Service resolving series and computing indicators over them.
pub struct AnalysisService {
    orchestrator: Arc<ProviderOrchestrator>,
    engine: IndicatorEngine,
}

impl AnalysisService {
    pub fn new(orchestrator: Arc<ProviderOrchestrator>, engine: IndicatorEngine) -> Self {
        Self {
            orchestrator,
            engine,
        }
    }

    /// Build the full stack from configuration: cache (file-backed when a
    /// cache directory is configured), health monitor, orchestrator and the
    /// standard indicator library.
    ///
    /// Providers disabled under `[providers.<ID>]` are not registered.
    pub fn from_config(
        config: &AppConfig,
        providers: Vec<Arc<dyn MarketDataProvider>>,
    ) -> Result<Self> {
        config.validate()?;

        let providers: Vec<Arc<dyn MarketDataProvider>> = providers
            .into_iter()
            .filter(|provider| {
                let enabled = config.is_enabled(provider.id());
                if !enabled {
                    info!("Provider {} disabled by configuration", provider.id());
                }
                enabled
            })
            .collect();
        if providers.is_empty() {
            warn!("No market data providers registered; only cached series can be served");
        }

        let cache = match config.disk_cache_path() {
            Some(path) => {
                info!("Opening market data cache at {}", path.display());
                TieredCache::open(&path, config.cache.clone())?
            }
            None => {
                debug!("No cache directory configured; disk tier kept in memory");
                TieredCache::in_memory(config.cache.clone())?
            }
        };
        let health = Arc::new(HealthMonitor::with_config(config.health.clone()));
        let orchestrator = ProviderOrchestrator::with_config(
            providers,
            Arc::new(cache),
            health,
            config.orchestrator_config(),
        );

        Ok(Self::new(Arc::new(orchestrator), IndicatorEngine::standard()?))
    }

    pub fn orchestrator(&self) -> &Arc<ProviderOrchestrator> {
        &self.orchestrator
    }

    pub fn engine(&self) -> &IndicatorEngine {
        &self.engine
    }

    /// Start the cache sweep and health probe loop. Must be called from
    /// within a tokio runtime.
    pub fn start_background_tasks(&self) -> MaintenanceHandles {
        info!("Starting market data maintenance tasks");
        self.orchestrator.spawn_maintenance()
    }

    /// Reject unknown indicator or group names.
    fn check_selection(&self, selection: &Selection) -> Result<()> {
        if let Selection::Only(names) = selection {
            for name in names {
                self.engine.registry().expand(name)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AnalysisServiceTrait for AnalysisService {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        let selection = request.selection();
        self.check_selection(&selection)?;

        let series = self
            .orchestrator
            .resolve(request.dataset, &request.symbol, request.params.clone())
            .await?;
        if series.stale {
            warn!(
                "Serving stale {} for {}: {}",
                request.dataset,
                request.symbol,
                series.diagnostics
            );
        }

        let report = self.engine.compute(&series.bars, &selection)?;
        debug!(
            "Analyzed {} {}: {} rows, {} indicators evaluated",
            request.dataset,
            request.symbol,
            report.rows,
            report.evaluated.len()
        );

        Ok(AnalysisResult {
            series: SeriesInfo::from(&series),
            indicators: report,
            bars: series.bars,
        })
    }

    async fn analyze_many(&self, requests: &[AnalysisRequest]) -> Vec<Result<AnalysisResult>> {
        join_all(requests.iter().map(|request| self.analyze(request))).await
    }

    async fn resolve(&self, request: &SeriesRequest) -> Result<ResolvedSeries> {
        Ok(self
            .orchestrator
            .resolve(request.dataset, &request.symbol, request.params.clone())
            .await?)
    }

    fn provider_health(&self) -> Vec<ProviderDescriptor> {
        self.orchestrator.provider_health()
    }

    fn invalidate(&self, request: &SeriesRequest) -> Result<bool> {
        let removed = self.orchestrator.invalidate(
            request.dataset,
            &request.symbol,
            request.params.clone(),
        )?;
        if removed {
            info!("Invalidated cached {} for {}", request.dataset, request.symbol);
        }
        Ok(removed)
    }

    fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.orchestrator.cache_stats()?)
    }

    fn available_indicators(&self) -> Vec<String> {
        self.engine
            .registry()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}
