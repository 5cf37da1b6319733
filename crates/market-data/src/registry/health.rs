//! Per-provider health tracking.
//!
//! Each provider moves through three states:
//!
//! - **Healthy**: Normal operation, preferred by the orchestrator.
//! - **Degraded**: Recent failures; still used, but only after every healthy provider.
//! - **Unavailable**: Skipped entirely until a background probe succeeds.
//!
//! State is in-memory and owned by whoever constructs the monitor; it resets
//! on restart.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::provider::MarketDataProvider;

/// Default number of consecutive failures before a provider is degraded.
const DEFAULT_ERROR_THRESHOLD: u32 = 3;

/// Default interval between probes of unavailable providers.
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Provider health state. Ordered from best to worst.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unavailable,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Unavailable => write!(f, "Unavailable"),
        }
    }
}

/// Result of one provider call, as reported to the monitor.
#[derive(Clone, Debug)]
pub enum Outcome {
    Success { latency: Duration },
    /// Transient failure; counts towards the consecutive-failure thresholds.
    Failure { message: String },
    /// The provider rejected us outright (revoked credentials and the like).
    HardFailure { message: String },
}

/// Health monitor configuration.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures before Healthy -> Degraded. Twice this value
    /// moves a provider to Unavailable.
    pub error_threshold: u32,
    /// Interval of the background probe loop.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub check_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

#[derive(Debug)]
struct ProviderHealth {
    state: HealthState,
    consecutive_failures: u32,
    total_requests: u64,
    total_failures: u64,
    latency_total: Duration,
    latency_samples: u32,
    last_error: Option<String>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    state_since: Instant,
}

impl ProviderHealth {
    fn new() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            total_requests: 0,
            total_failures: 0,
            latency_total: Duration::ZERO,
            latency_samples: 0,
            last_error: None,
            last_success: None,
            last_failure: None,
            state_since: Instant::now(),
        }
    }

    fn transition(&mut self, provider: &str, next: HealthState) {
        if self.state == next {
            return;
        }
        info!(
            "Health monitor: '{}' {} -> {} after {} consecutive failures",
            provider, self.state, next, self.consecutive_failures
        );
        self.state = next;
        self.state_since = Instant::now();
    }
}

/// Point-in-time metrics for one provider.
#[derive(Clone, Debug, Serialize)]
pub struct HealthSnapshot {
    pub provider: String,
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    /// Failures divided by requests; 0.0 when nothing was recorded yet.
    pub error_rate: f64,
    pub avg_latency: Option<Duration>,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    /// Time spent in the current state.
    pub state_age: Duration,
}

/// Per-provider health monitor.
///
/// Thread-safe; share it behind an `Arc` between the orchestrator and the
/// probe loop.
pub struct HealthMonitor {
    providers: Mutex<HashMap<String, ProviderHealth>>,
    config: HealthConfig,
}

impl HealthMonitor {
    /// Create a new monitor with default settings.
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    /// Create a monitor with custom configuration.
    pub fn with_config(config: HealthConfig) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Lock the providers mutex, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is slightly stale health data.
    fn lock_providers(&self) -> MutexGuard<'_, HashMap<String, ProviderHealth>> {
        self.providers.lock().unwrap_or_else(|poisoned| {
            warn!("Health monitor mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn threshold(&self) -> u32 {
        self.config.error_threshold.max(1)
    }

    /// Record the outcome of a provider call and apply state transitions.
    pub fn report_outcome(&self, provider: &str, outcome: Outcome) {
        let threshold = self.threshold();
        let mut providers = self.lock_providers();
        let health = providers
            .entry(provider.to_string())
            .or_insert_with(ProviderHealth::new);
        health.total_requests += 1;

        match outcome {
            Outcome::Success { latency } => {
                health.latency_total = health.latency_total.saturating_add(latency);
                health.latency_samples = health.latency_samples.saturating_add(1);
                health.last_success = Some(Utc::now());
                health.consecutive_failures = 0;
                health.transition(provider, HealthState::Healthy);
                debug!("Health monitor: success for '{}' in {:?}", provider, latency);
            }
            Outcome::Failure { message } => {
                health.total_failures += 1;
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                health.last_failure = Some(Utc::now());
                health.last_error = Some(message);

                let target = if health.consecutive_failures >= threshold.saturating_mul(2) {
                    HealthState::Unavailable
                } else if health.consecutive_failures >= threshold {
                    HealthState::Degraded
                } else {
                    HealthState::Healthy
                };
                debug!(
                    "Health monitor: failure for '{}' ({}/{})",
                    provider, health.consecutive_failures, threshold
                );
                let next = health.state.max(target);
                health.transition(provider, next);
            }
            Outcome::HardFailure { message } => {
                health.total_failures += 1;
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                health.last_failure = Some(Utc::now());
                warn!("Health monitor: hard failure for '{}': {}", provider, message);
                health.last_error = Some(message);

                let next = match health.state {
                    HealthState::Healthy => HealthState::Degraded,
                    HealthState::Degraded | HealthState::Unavailable => HealthState::Unavailable,
                };
                health.transition(provider, next);
            }
        }
    }

    pub fn record_success(&self, provider: &str, latency: Duration) {
        self.report_outcome(provider, Outcome::Success { latency });
    }

    pub fn record_failure(&self, provider: &str, message: impl Into<String>) {
        self.report_outcome(
            provider,
            Outcome::Failure {
                message: message.into(),
            },
        );
    }

    pub fn record_hard_failure(&self, provider: &str, message: impl Into<String>) {
        self.report_outcome(
            provider,
            Outcome::HardFailure {
                message: message.into(),
            },
        );
    }

    /// Deliberately take a provider out of rotation until it is probed back.
    pub fn open_circuit(&self, provider: &str, reason: &str) {
        let mut providers = self.lock_providers();
        let health = providers
            .entry(provider.to_string())
            .or_insert_with(ProviderHealth::new);
        info!("Health monitor: opening circuit for '{}': {}", provider, reason);
        health.last_error = Some(reason.to_string());
        health.transition(provider, HealthState::Unavailable);
    }

    /// Current state for a provider. Unknown providers are Healthy.
    pub fn state(&self, provider: &str) -> HealthState {
        self.lock_providers()
            .get(provider)
            .map(|h| h.state)
            .unwrap_or(HealthState::Healthy)
    }

    pub fn is_available(&self, provider: &str) -> bool {
        self.state(provider) != HealthState::Unavailable
    }

    pub fn consecutive_failures(&self, provider: &str) -> u32 {
        self.lock_providers()
            .get(provider)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }

    /// Reset a provider to a fresh Healthy record.
    pub fn reset(&self, provider: &str) {
        if self.lock_providers().remove(provider).is_some() {
            info!("Health monitor: manually reset '{}'", provider);
        }
    }

    pub fn reset_all(&self) {
        self.lock_providers().clear();
        info!("Health monitor: all providers reset");
    }

    /// Metrics for one provider, if it has been seen.
    pub fn snapshot_of(&self, provider: &str) -> Option<HealthSnapshot> {
        self.lock_providers()
            .get(provider)
            .map(|h| Self::build_snapshot(provider, h))
    }

    /// Metrics for every tracked provider, sorted by provider id.
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let providers = self.lock_providers();
        let mut snapshots: Vec<HealthSnapshot> = providers
            .iter()
            .map(|(id, h)| Self::build_snapshot(id, h))
            .collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }

    fn build_snapshot(provider: &str, health: &ProviderHealth) -> HealthSnapshot {
        let error_rate = if health.total_requests == 0 {
            0.0
        } else {
            health.total_failures as f64 / health.total_requests as f64
        };
        let avg_latency = (health.latency_samples > 0)
            .then(|| health.latency_total / health.latency_samples);

        HealthSnapshot {
            provider: provider.to_string(),
            state: health.state,
            consecutive_failures: health.consecutive_failures,
            total_requests: health.total_requests,
            total_failures: health.total_failures,
            error_rate,
            avg_latency,
            last_error: health.last_error.clone(),
            last_success: health.last_success,
            last_failure: health.last_failure,
            state_age: health.state_since.elapsed(),
        }
    }

    /// Probe every unavailable provider once. Returns how many were restored.
    pub async fn run_probes(&self, providers: &[Arc<dyn MarketDataProvider>]) -> usize {
        let candidates: Vec<&Arc<dyn MarketDataProvider>> = providers
            .iter()
            .filter(|p| self.state(p.id()) == HealthState::Unavailable)
            .collect();
        if candidates.is_empty() {
            return 0;
        }

        let results = join_all(candidates.iter().map(|provider| async move {
            let started = Instant::now();
            let result = provider.probe().await;
            (provider.id(), result, started.elapsed())
        }))
        .await;

        let mut restored = 0;
        for (id, result, latency) in results {
            match result {
                Ok(()) => {
                    info!("Health monitor: probe succeeded for '{}'", id);
                    self.record_success(id, latency);
                    restored += 1;
                }
                Err(e) => {
                    debug!("Health monitor: probe failed for '{}': {}", id, e);
                    self.record_failure(id, e.to_string());
                }
            }
        }
        restored
    }

    /// Spawn the background probe loop on the current tokio runtime.
    pub fn spawn_probe_loop(
        self: Arc<Self>,
        providers: Vec<Arc<dyn MarketDataProvider>>,
    ) -> JoinHandle<()> {
        let period = self.config.check_interval.max(MIN_CHECK_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let restored = self.run_probes(&providers).await;
                if restored > 0 {
                    info!("Health monitor: {} provider(s) back in rotation", restored);
                }
            }
        })
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
