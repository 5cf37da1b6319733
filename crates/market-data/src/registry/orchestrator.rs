//! Provider orchestration.
//!
//! Resolves a series from the cache or from providers:
//! - Cache lookup (memory, then disk); fresh hits never touch the network
//! - Request coalescing: one outbound fetch per key via [`TicketBoard`]
//! - Provider selection by dataset capability, health state and priority
//! - Rate limiting and retry with backoff per provider
//! - Row validation and write-through caching
//! - Stale-cache fallback when every provider fails

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::{self, JoinHandle};
use tokio::time::Instant;

use super::health::{HealthMonitor, HealthSnapshot, HealthState};
use super::rate_limiter::{RateLimitConfig, RateLimiter};
use super::retry::{RetryConfig, RetryPolicy};
use super::diagnostics::{FetchDiagnostics, SkipReason};
use super::ticket::{FetchOutcome, TicketBoard, TicketRole};
use super::validator::BarValidator;
use crate::cache::{CacheEntry, CacheLookup, CacheStats, TieredCache};
use crate::errors::{MarketDataError, RetryClass};
use crate::models::{
    Bar, CacheKey, DatasetType, ProviderId, QueryParams, ResolvedSeries, SeriesRequest,
    SeriesSource,
};
use crate::provider::MarketDataProvider;

/// Orchestrator tuning.
#[derive(Clone, Debug, Default)]
pub struct OrchestratorConfig {
    pub retry: RetryConfig,
    /// Per-provider rate limits. Providers not listed use their declared limit.
    pub rate_limits: HashMap<String, RateLimitConfig>,
    /// User-configured priorities (provider_id -> priority).
    /// Lower values = higher priority. If not set, falls back to the provider's
    /// declared priority.
    pub priorities: HashMap<String, i32>,
    /// Default bound on how long one caller waits for an in-flight fetch.
    pub wait_timeout: Option<Duration>,
}

/// Status view of one registered provider.
#[derive(Clone, Debug, Serialize)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub priority: i32,
    pub datasets: Vec<DatasetType>,
    pub state: HealthState,
    /// `None` until the provider has been called at least once.
    pub metrics: Option<HealthSnapshot>,
}

/// Handles of the background maintenance tasks.
pub struct MaintenanceHandles {
    pub sweeper: JoinHandle<()>,
    pub prober: JoinHandle<()>,
}

impl MaintenanceHandles {
    pub fn shutdown(self) {
        self.sweeper.abort();
        self.prober.abort();
    }
}

/// Resolves series through cache and providers.
///
/// Methods that may start a fetch take `self: &Arc<Self>` because the fetch
/// runs on its own task, so a caller giving up does not cancel it.
pub struct ProviderOrchestrator {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    cache: Arc<TieredCache>,
    health: Arc<HealthMonitor>,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
    validator: BarValidator,
    tickets: TicketBoard,
    custom_priorities: HashMap<String, i32>,
    wait_timeout: Option<Duration>,
}

impl ProviderOrchestrator {
    /// Create an orchestrator with default retry settings and each provider's
    /// declared rate limit.
    pub fn new(
        providers: Vec<Arc<dyn MarketDataProvider>>,
        cache: Arc<TieredCache>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self::with_config(providers, cache, health, OrchestratorConfig::default())
    }

    pub fn with_config(
        providers: Vec<Arc<dyn MarketDataProvider>>,
        cache: Arc<TieredCache>,
        health: Arc<HealthMonitor>,
        config: OrchestratorConfig,
    ) -> Self {
        let rate_limiter = RateLimiter::new();

        // Configure rate limits for each provider
        for provider in &providers {
            let limit = config
                .rate_limits
                .get(provider.id())
                .cloned()
                .unwrap_or_else(|| provider.rate_limit().into());
            rate_limiter.configure(provider.id(), limit);
        }

        Self {
            providers,
            cache,
            health,
            rate_limiter,
            retry: RetryPolicy::new(config.retry),
            validator: BarValidator::new(),
            tickets: TicketBoard::new(),
            custom_priorities: config.priorities,
            wait_timeout: config.wait_timeout,
        }
    }

    /// Resolve a series.
    ///
    /// Returns a fresh cache entry when one exists. Otherwise joins (or
    /// starts) the single in-flight fetch for the key. When every provider
    /// fails, an expired entry is returned with `stale` set; without one the
    /// call fails with [`MarketDataError::AllProvidersExhausted`].
    pub async fn resolve(
        self: &Arc<Self>,
        dataset: DatasetType,
        symbol: &str,
        params: QueryParams,
    ) -> Result<ResolvedSeries, MarketDataError> {
        self.resolve_inner(dataset, symbol, params, self.wait_timeout)
            .await
    }

    /// Like [`resolve`](Self::resolve), but this caller stops waiting after
    /// `timeout` with [`MarketDataError::WaitTimeout`]. The fetch itself keeps
    /// running and still populates the cache.
    pub async fn resolve_with_timeout(
        self: &Arc<Self>,
        dataset: DatasetType,
        symbol: &str,
        params: QueryParams,
        timeout: Duration,
    ) -> Result<ResolvedSeries, MarketDataError> {
        self.resolve_inner(dataset, symbol, params, Some(timeout))
            .await
    }

    /// Resolve many series concurrently. Results are in request order.
    pub async fn resolve_many(
        self: &Arc<Self>,
        requests: &[SeriesRequest],
    ) -> Vec<Result<ResolvedSeries, MarketDataError>> {
        join_all(
            requests
                .iter()
                .map(|r| self.resolve(r.dataset, &r.symbol, r.params.clone())),
        )
        .await
    }

    async fn resolve_inner(
        self: &Arc<Self>,
        dataset: DatasetType,
        symbol: &str,
        params: QueryParams,
        timeout: Option<Duration>,
    ) -> Result<ResolvedSeries, MarketDataError> {
        let key = CacheKey::new(dataset, symbol, params)?;
        self.ensure_supported(dataset)?;

        if let CacheLookup::Fresh(entry, tier) = self.cached(&key).await {
            debug!("Cache hit for {} ({:?})", key, tier);
            return Ok(ResolvedSeries::from_cache(entry, tier, false));
        }

        let waiter = match self.tickets.join(&key) {
            TicketRole::Leader(lease) => {
                let waiter = lease.waiter();
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let key = lease.key().clone();
                    let outcome = this.fetch_and_store(&key).await;
                    lease.complete(outcome);
                });
                waiter
            }
            TicketRole::Follower(waiter) => waiter,
        };

        match timeout {
            Some(timeout) => waiter.wait_timeout(timeout).await,
            None => waiter.wait().await,
        }
    }

    fn ensure_supported(&self, dataset: DatasetType) -> Result<(), MarketDataError> {
        if self
            .providers
            .iter()
            .any(|p| p.capabilities().supports(dataset))
        {
            Ok(())
        } else {
            warn!("No providers registered for dataset {}", dataset);
            Err(MarketDataError::UnsupportedDataset(dataset))
        }
    }

    /// Cache lookup on the blocking pool. The disk tier does SQLite I/O.
    async fn cached(&self, key: &CacheKey) -> CacheLookup {
        let cache = Arc::clone(&self.cache);
        let key = key.clone();
        match task::spawn_blocking(move || cache.lookup(&key)).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!("Cache lookup task failed: {}", e);
                CacheLookup::Miss
            }
        }
    }

    async fn store(
        &self,
        key: &CacheKey,
        bars: Arc<Vec<Bar>>,
        ttl: Duration,
    ) -> Result<CacheEntry, MarketDataError> {
        let cache = Arc::clone(&self.cache);
        let key = key.clone();
        task::spawn_blocking(move || cache.put(key, bars, ttl))
            .await
            .map_err(|e| MarketDataError::Cache(format!("Cache write task failed: {}", e)))?
    }

    /// Body of a coalesced fetch. Runs once per ticket.
    async fn fetch_and_store(&self, key: &CacheKey) -> FetchOutcome {
        // A previous leader may have filled the cache since our lookup
        let stale = match self.cached(key).await {
            CacheLookup::Fresh(entry, tier) => {
                return Ok(ResolvedSeries::from_cache(entry, tier, false));
            }
            CacheLookup::Stale(entry, tier) => Some((entry, tier)),
            CacheLookup::Miss => None,
        };

        let mut diagnostics = FetchDiagnostics::new();
        let candidates = self.ordered_providers(key.dataset, &mut diagnostics);

        for provider in candidates {
            let provider_id: ProviderId = Cow::Borrowed(provider.id());

            match self.fetch_from(provider, key).await {
                Ok(bars) => {
                    diagnostics.record_success(provider_id.clone());
                    let bars = Arc::new(bars);
                    let ttl = self.cache.ttl_for(key.dataset);
                    let fetched_at = match self.store(key, Arc::clone(&bars), ttl).await {
                        Ok(entry) => entry.fetched_at,
                        Err(e) => {
                            warn!("Failed to cache {}: {}", key, e);
                            Utc::now()
                        }
                    };

                    info!(
                        "Fetched {} rows for {} from '{}'",
                        bars.len(),
                        key,
                        provider_id
                    );
                    return Ok(ResolvedSeries {
                        key: key.clone(),
                        bars,
                        source: SeriesSource::Provider(provider_id),
                        fetched_at,
                        stale: false,
                        diagnostics,
                    });
                }
                Err(e) => {
                    diagnostics.record_error(provider_id.clone(), e.to_string());
                    if e.retry_class() == RetryClass::Never {
                        info!(
                            "Terminal error from '{}' for {}: {}, not trying other providers",
                            provider_id, key, e
                        );
                        return Err(e);
                    }
                    info!(
                        "Provider '{}' failed for {}: {}, trying next provider",
                        provider_id, key, e
                    );
                }
            }
        }

        if let Some((entry, tier)) = stale {
            warn!(
                "All providers failed for {} ({}); serving stale data fetched at {}",
                key, diagnostics, entry.fetched_at
            );
            let mut series = ResolvedSeries::from_cache(entry, tier, true);
            series.diagnostics = diagnostics;
            return Ok(series);
        }

        warn!("All providers exhausted for {}: {}", key, diagnostics);
        Err(MarketDataError::AllProvidersExhausted {
            key: key.to_string(),
            diagnostics,
        })
    }

    /// One provider, through the rate limiter and retry policy.
    async fn fetch_from(
        &self,
        provider: &Arc<dyn MarketDataProvider>,
        key: &CacheKey,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let id = provider.id();

        self.retry
            .execute(id, move |attempt| async move {
                // Our own limiter timing out is not the provider's fault
                self.rate_limiter.acquire(id).await?;

                debug!("Fetching {} from '{}' (attempt {})", key, id, attempt + 1);
                let started = Instant::now();
                let raw = match provider.fetch(key.dataset, &key.symbol, &key.params).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        self.penalize(id, &e);
                        return Err(e);
                    }
                };
                let latency = started.elapsed();

                let bars = match self.validator.validate_series(id, raw) {
                    Ok(bars) => bars,
                    Err(e) => {
                        self.penalize(id, &e);
                        return Err(e);
                    }
                };
                self.health.record_success(id, latency);

                if bars.is_empty() {
                    return Err(MarketDataError::NoDataForRange {
                        provider: id.to_string(),
                    });
                }
                Ok(bars)
            })
            .await
    }

    fn penalize(&self, provider: &str, error: &MarketDataError) {
        match error.retry_class() {
            RetryClass::WithBackoff => self.health.record_failure(provider, error.to_string()),
            RetryClass::FailoverWithPenalty => {
                self.health.record_hard_failure(provider, error.to_string())
            }
            RetryClass::NextProvider | RetryClass::Never => {}
        }
    }

    fn effective_priority(&self, provider: &Arc<dyn MarketDataProvider>) -> i32 {
        self.custom_priorities
            .get(provider.id())
            .copied()
            .unwrap_or_else(|| i32::from(provider.priority()))
    }

    /// Capable, non-unavailable providers: healthy ones first, then by priority.
    fn ordered_providers(
        &self,
        dataset: DatasetType,
        diagnostics: &mut FetchDiagnostics,
    ) -> Vec<&Arc<dyn MarketDataProvider>> {
        let mut candidates = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let provider_id: ProviderId = Cow::Borrowed(provider.id());
            if !provider.capabilities().supports(dataset) {
                diagnostics.record_skip(provider_id, SkipReason::DatasetNotSupported);
                continue;
            }

            let state = self.health.state(provider.id());
            if state == HealthState::Unavailable {
                debug!("Provider '{}' is unavailable, skipping", provider_id);
                diagnostics.record_skip(provider_id, SkipReason::ProviderUnavailable);
                continue;
            }

            candidates.push((state, self.effective_priority(provider), provider));
        }

        // Stable sort keeps registration order between equal priorities
        candidates.sort_by_key(|(state, priority, _)| (*state, *priority));
        candidates.into_iter().map(|(_, _, p)| p).collect()
    }

    /// Health and priority of every registered provider, in priority order.
    pub fn provider_health(&self) -> Vec<ProviderDescriptor> {
        let mut descriptors: Vec<ProviderDescriptor> = self
            .providers
            .iter()
            .map(|provider| ProviderDescriptor {
                id: Cow::Borrowed(provider.id()),
                priority: self.effective_priority(provider),
                datasets: provider.capabilities().datasets.to_vec(),
                state: self.health.state(provider.id()),
                metrics: self.health.snapshot_of(provider.id()),
            })
            .collect();
        descriptors.sort_by_key(|d| d.priority);
        descriptors
    }

    /// Drop the cached entry for one request, if any.
    pub fn invalidate(
        &self,
        dataset: DatasetType,
        symbol: &str,
        params: QueryParams,
    ) -> Result<bool, MarketDataError> {
        let key = CacheKey::new(dataset, symbol, params)?;
        self.invalidate_key(&key)
    }

    pub fn invalidate_key(&self, key: &CacheKey) -> Result<bool, MarketDataError> {
        self.cache.invalidate(key)
    }

    pub fn cache_stats(&self) -> Result<CacheStats, MarketDataError> {
        self.cache.stats()
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.tickets.in_flight()
    }

    pub fn providers(&self) -> &[Arc<dyn MarketDataProvider>] {
        &self.providers
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Start the cache sweep and the health probe loop.
    pub fn spawn_maintenance(&self) -> MaintenanceHandles {
        MaintenanceHandles {
            sweeper: Arc::clone(&self.cache).spawn_sweeper(),
            prober: Arc::clone(&self.health).spawn_probe_loop(self.providers.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::cache::{CacheConfig, CacheTier};
    use crate::provider::{ProviderCapabilities, RateLimit};
    use crate::registry::{AttemptOutcome, HealthConfig};

    struct MockProvider {
        id: &'static str,
        priority: u8,
        datasets: &'static [DatasetType],
        call_count: AtomicUsize,
        failure: Mutex<Option<MarketDataError>>,
        rows: Mutex<Option<Vec<Bar>>>,
        delay: Duration,
    }

    impl MockProvider {
        fn new(id: &'static str, priority: u8) -> Self {
            Self {
                id,
                priority,
                datasets: &[DatasetType::DailyBars, DatasetType::WeeklyBars],
                call_count: AtomicUsize::new(0),
                failure: Mutex::new(None),
                rows: Mutex::new(None),
                delay: Duration::ZERO,
            }
        }

        fn failing(id: &'static str, priority: u8, error: MarketDataError) -> Self {
            let provider = Self::new(id, priority);
            *provider.failure.lock().unwrap() = Some(error);
            provider
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn with_rows(self, rows: Vec<Bar>) -> Self {
            *self.rows.lock().unwrap() = Some(rows);
            self
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                datasets: self.datasets,
            }
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit {
                tokens_per_interval: 1000,
                interval: Duration::from_secs(1),
                burst_capacity: 100,
            }
        }

        async fn fetch(
            &self,
            _dataset: DatasetType,
            _symbol: &str,
            _params: &QueryParams,
        ) -> Result<Vec<Bar>, MarketDataError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            if let Some(error) = self.failure.lock().unwrap().clone() {
                return Err(error);
            }
            Ok(self
                .rows
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| sample_bars(5, dec!(100))))
        }
    }

    fn sample_bars(n: usize, base: Decimal) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64);
                let close = base + Decimal::from(i as i64);
                Bar::ohlcv(ts, close, close + dec!(1), close - dec!(1), close, dec!(5000))
            })
            .collect()
    }

    fn params() -> QueryParams {
        QueryParams::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
    }

    fn timeout_error(id: &str) -> MarketDataError {
        MarketDataError::Timeout {
            provider: id.to_string(),
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            jitter: false,
        }
    }

    fn orchestrator_with(
        providers: Vec<Arc<MockProvider>>,
        config: OrchestratorConfig,
    ) -> Arc<ProviderOrchestrator> {
        let cache = Arc::new(TieredCache::in_memory(CacheConfig::default()).unwrap());
        let health = Arc::new(HealthMonitor::with_config(HealthConfig {
            error_threshold: 3,
            check_interval: Duration::from_secs(60),
        }));
        let providers: Vec<Arc<dyn MarketDataProvider>> = providers
            .into_iter()
            .map(|p| p as Arc<dyn MarketDataProvider>)
            .collect();
        Arc::new(ProviderOrchestrator::with_config(
            providers, cache, health, config,
        ))
    }

    fn orchestrator(providers: Vec<Arc<MockProvider>>) -> Arc<ProviderOrchestrator> {
        orchestrator_with(
            providers,
            OrchestratorConfig {
                retry: fast_retry(),
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_resolve_is_served_from_cache() {
        let a = Arc::new(MockProvider::new("A", 1));
        let orch = orchestrator(vec![a.clone()]);

        let first = orch.resolve(DatasetType::DailyBars, "aapl", params()).await.unwrap();
        assert_eq!(first.source, SeriesSource::Provider(Cow::Borrowed("A")));
        assert_eq!(first.len(), 5);
        assert!(!first.stale);

        let second = orch.resolve(DatasetType::DailyBars, "AAPL ", params()).await.unwrap();
        assert_eq!(second.source, SeriesSource::Memory);
        assert_eq!(*second.bars, *first.bars);
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_provider_is_not_called() {
        let a = Arc::new(MockProvider::new("A", 1));
        let b = Arc::new(MockProvider::new("B", 2));
        let orch = orchestrator(vec![a.clone(), b.clone()]);
        orch.health().open_circuit("A", "maintenance");

        let series = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();

        assert_eq!(series.source, SeriesSource::Provider(Cow::Borrowed("B")));
        assert_eq!(a.calls(), 0);
        assert_eq!(b.calls(), 1);
        let attempts = series.diagnostics.attempts();
        assert_eq!(attempts[0].provider_id, "A");
        assert_eq!(
            attempts[0].outcome,
            AttemptOutcome::Skipped(SkipReason::ProviderUnavailable)
        );
        assert_eq!(attempts[1].outcome, AttemptOutcome::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_provider_routes_to_backup_then_cache() {
        let a = Arc::new(MockProvider::failing("A", 1, timeout_error("A")));
        let b = Arc::new(MockProvider::new("B", 2));
        let orch = orchestrator(vec![a.clone(), b.clone()]);

        // A times out on every attempt: three failures, threshold three
        let series = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert_eq!(series.source, SeriesSource::Provider(Cow::Borrowed("B")));
        assert_eq!(a.calls(), 3);
        assert_eq!(orch.health().state("A"), HealthState::Degraded);

        // Further requests for the dataset go to B first
        let other = orch.resolve(DatasetType::DailyBars, "MSFT", params()).await.unwrap();
        assert_eq!(other.source, SeriesSource::Provider(Cow::Borrowed("B")));
        assert_eq!(a.calls(), 3);
        assert_eq!(b.calls(), 2);

        // Within TTL the first key is served from cache with no provider calls
        let cached = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert!(cached.is_from_cache());
        assert_eq!(a.calls(), 3);
        assert_eq!(b.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried_and_degrades() {
        let a = Arc::new(MockProvider::failing(
            "A",
            1,
            MarketDataError::Unauthorized {
                provider: "A".to_string(),
                message: "token revoked".to_string(),
            },
        ));
        let b = Arc::new(MockProvider::new("B", 2));
        let orch = orchestrator(vec![a.clone(), b.clone()]);

        let series = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert_eq!(series.source, SeriesSource::Provider(Cow::Borrowed("B")));
        assert_eq!(a.calls(), 1);
        assert_eq!(orch.health().state("A"), HealthState::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_symbol_not_found_moves_on_without_penalty() {
        let a = Arc::new(MockProvider::failing(
            "A",
            1,
            MarketDataError::SymbolNotFound {
                provider: "A".to_string(),
                symbol: "AAPL".to_string(),
            },
        ));
        let b = Arc::new(MockProvider::new("B", 2));
        let orch = orchestrator(vec![a.clone(), b.clone()]);

        orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert_eq!(a.calls(), 1);
        assert_eq!(orch.health().state("A"), HealthState::Healthy);
        assert_eq!(orch.health().consecutive_failures("A"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_tries_next_provider() {
        let a = Arc::new(MockProvider::new("A", 1).with_rows(Vec::new()));
        let b = Arc::new(MockProvider::new("B", 2));
        let orch = orchestrator(vec![a.clone(), b.clone()]);

        let series = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert_eq!(series.source, SeriesSource::Provider(Cow::Borrowed("B")));
        assert_eq!(orch.health().state("A"), HealthState::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_payload_is_a_hard_failure() {
        let garbage = vec![Bar::new(Utc::now(), dec!(-3))];
        let a = Arc::new(MockProvider::new("A", 1).with_rows(garbage));
        let b = Arc::new(MockProvider::new("B", 2));
        let orch = orchestrator(vec![a.clone(), b.clone()]);

        let series = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert_eq!(series.source, SeriesSource::Provider(Cow::Borrowed("B")));
        assert_eq!(a.calls(), 1);
        assert_eq!(orch.health().state("A"), HealthState::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_without_cache_fails() {
        let a = Arc::new(MockProvider::failing("A", 1, timeout_error("A")));
        let b = Arc::new(MockProvider::failing("B", 2, timeout_error("B")));
        let orch = orchestrator(vec![a.clone(), b.clone()]);

        let err = orch
            .resolve(DatasetType::DailyBars, "AAPL", params())
            .await
            .unwrap_err();

        match err {
            MarketDataError::AllProvidersExhausted { key, diagnostics } => {
                assert!(key.starts_with("daily_bars:AAPL:"));
                let outcomes: Vec<_> = diagnostics.attempts().iter().map(|a| &a.outcome).collect();
                assert_eq!(outcomes.len(), 2);
                assert!(outcomes.iter().all(|o| matches!(o, AttemptOutcome::Failed(_))));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(a.calls(), 3);
        assert_eq!(b.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_serves_stale_entry() {
        let a = Arc::new(MockProvider::failing("A", 1, timeout_error("A")));
        let orch = orchestrator(vec![a.clone()]);
        let key = CacheKey::new(DatasetType::DailyBars, "AAPL", params()).unwrap();
        let old = Arc::new(sample_bars(3, dec!(50)));
        orch.cache()
            .put(key.clone(), Arc::clone(&old), Duration::ZERO)
            .unwrap();

        let series = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();

        assert!(series.stale);
        assert_eq!(series.source, SeriesSource::Disk);
        assert_eq!(*series.bars, *old);
        assert_eq!(series.diagnostics.providers_called().count(), 1);
        assert!(series.diagnostics.to_string().starts_with("A failed: "));
        assert_eq!(a.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_is_refreshed_when_provider_recovers() {
        let a = Arc::new(MockProvider::new("A", 1));
        let orch = orchestrator(vec![a.clone()]);
        let key = CacheKey::new(DatasetType::DailyBars, "AAPL", params()).unwrap();
        orch.cache()
            .put(key, Arc::new(sample_bars(3, dec!(50))), Duration::ZERO)
            .unwrap();

        let series = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert!(!series.stale);
        assert_eq!(series.len(), 5);
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn test_caller_errors_fail_fast() {
        let a = Arc::new(MockProvider::new("A", 1));
        let orch = orchestrator(vec![a.clone()]);

        let err = orch
            .resolve(DatasetType::Fundamentals, "AAPL", params())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MarketDataError::UnsupportedDataset(DatasetType::Fundamentals)
        ));

        let inverted = QueryParams::new(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        let err = orch
            .resolve(DatasetType::DailyBars, "AAPL", inverted)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidParameters(_)));

        let err = orch
            .resolve(DatasetType::DailyBars, "  ", params())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidParameters(_)));

        assert_eq!(a.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_priority_overrides_declared_priority() {
        let a = Arc::new(MockProvider::new("A", 1));
        let b = Arc::new(MockProvider::new("B", 2));
        let orch = orchestrator_with(
            vec![a.clone(), b.clone()],
            OrchestratorConfig {
                retry: fast_retry(),
                priorities: HashMap::from([("B".to_string(), 0)]),
                ..Default::default()
            },
        );

        let series = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert_eq!(series.source, SeriesSource::Provider(Cow::Borrowed("B")));
        assert_eq!(a.calls(), 0);

        let ids: Vec<String> = orch.provider_health().iter().map(|d| d.id.to_string()).collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_fetch() {
        let a = Arc::new(MockProvider::new("A", 1).with_delay(Duration::from_millis(50)));
        let orch = orchestrator(vec![a.clone()]);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move {
                    orch.resolve(DatasetType::DailyBars, "AAPL", params()).await
                })
            })
            .collect();

        for handle in handles {
            let series = handle.await.unwrap().unwrap();
            assert_eq!(series.len(), 5);
        }
        assert_eq!(a.calls(), 1);
        assert_eq!(orch.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesced_callers_share_failure() {
        let a = Arc::new(
            MockProvider::failing("A", 1, timeout_error("A")).with_delay(Duration::from_millis(20)),
        );
        let orch = orchestrator(vec![a.clone()]);

        let results = join_all((0..4).map(|_| orch.resolve(DatasetType::DailyBars, "AAPL", params())))
            .await;

        for result in results {
            assert!(matches!(
                result,
                Err(MarketDataError::AllProvidersExhausted { .. })
            ));
        }
        assert_eq!(a.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_does_not_cancel_fetch() {
        let a = Arc::new(MockProvider::new("A", 1).with_delay(Duration::from_secs(10)));
        let orch = orchestrator(vec![a.clone()]);

        let err = orch
            .resolve_with_timeout(
                DatasetType::DailyBars,
                "AAPL",
                params(),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::WaitTimeout { .. }));
        assert_eq!(orch.in_flight(), 1);

        // A patient caller joins the same fetch
        let series = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_many_preserves_order() {
        let a = Arc::new(MockProvider::new("A", 1));
        let orch = orchestrator(vec![a.clone()]);

        let requests = vec![
            SeriesRequest::new(DatasetType::DailyBars, "AAPL", params()),
            SeriesRequest::new(DatasetType::Fundamentals, "AAPL", params()),
            SeriesRequest::new(DatasetType::DailyBars, "MSFT", params()),
        ];
        let results = orch.resolve_many(&requests).await;

        assert_eq!(results.len(), 3);
        assert_eq!(&*results[0].as_ref().unwrap().key.symbol, "AAPL");
        assert!(results[1].is_err());
        assert_eq!(&*results[2].as_ref().unwrap().key.symbol, "MSFT");
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refetch() {
        let a = Arc::new(MockProvider::new("A", 1));
        let orch = orchestrator(vec![a.clone()]);

        orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert!(orch.invalidate(DatasetType::DailyBars, "aapl", params()).unwrap());

        let series = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert!(!series.is_from_cache());
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_health_snapshot() {
        let a = Arc::new(MockProvider::failing("A", 1, timeout_error("A")));
        let b = Arc::new(MockProvider::new("B", 2));
        let orch = orchestrator(vec![a.clone(), b.clone()]);
        orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();

        let health = orch.provider_health();
        assert_eq!(health.len(), 2);
        assert_eq!(health[0].id, "A");
        assert_eq!(health[0].state, HealthState::Degraded);
        let metrics = health[0].metrics.as_ref().unwrap();
        assert_eq!(metrics.total_failures, 3);
        assert!((metrics.error_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(health[1].state, HealthState::Healthy);
        assert!(health[1].datasets.contains(&DatasetType::DailyBars));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefilled_cache_skips_providers() {
        let a = Arc::new(MockProvider::new("A", 1));
        let orch = orchestrator(vec![a.clone()]);
        let key = CacheKey::new(DatasetType::DailyBars, "AAPL", params()).unwrap();
        orch.cache()
            .put(key, Arc::new(sample_bars(2, dec!(10))), Duration::from_secs(60))
            .unwrap();

        let series = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert_eq!(series.source, SeriesSource::from(CacheTier::Memory));
        assert_eq!(series.len(), 2);
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_file_backed_cache_serves_disk_hit_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");
        let a = Arc::new(MockProvider::new("A", 1));
        let open = |a: Arc<MockProvider>| {
            let cache = Arc::new(TieredCache::open(&path, CacheConfig::default()).unwrap());
            let health = Arc::new(HealthMonitor::new());
            Arc::new(ProviderOrchestrator::new(
                vec![a as Arc<dyn MarketDataProvider>],
                cache,
                health,
            ))
        };

        let first = open(a.clone())
            .resolve(DatasetType::DailyBars, "AAPL", params())
            .await
            .unwrap();
        assert_eq!(first.source, SeriesSource::Provider(Cow::Borrowed("A")));

        let orch = open(a.clone());
        let second = orch.resolve(DatasetType::DailyBars, "AAPL", params()).await.unwrap();
        assert_eq!(second.source, SeriesSource::from(CacheTier::Disk));
        assert_eq!(second.bars, first.bars);
        assert_eq!(a.calls(), 1);
        assert_eq!(orch.cache_stats().unwrap().disk_hits, 1);
    }
}
