//! Quantdesk Market Data Crate
//!
//! This crate fetches time-series market data from several unreliable,
//! rate-limited providers and keeps it in a two-tier cache.
//!
//! # Overview
//!
//! The market data crate supports:
//! - Multiple datasets: daily/weekly/minute bars, fundamentals
//! - Any number of providers behind the [`MarketDataProvider`] trait
//! - Rate limiting, retry with backoff, and health-based failover
//! - One outbound fetch per key no matter how many callers ask
//! - In-memory LRU in front of a size-bounded SQLite cache
//!
//! # Architecture
//!
//! ```text
//!                          +----------------------+
//!      resolve(key) -----> | ProviderOrchestrator |
//!                          +----------------------+
//!                             |               |
//!                    hit      v               v   miss
//!                  +--------------+    +-------------+
//!                  | TieredCache  |    | TicketBoard |  (coalescing)
//!                  | memory, disk |    +-------------+
//!                  +--------------+           |
//!                          ^                  v
//!                          |        +-------------------+
//!                 write-   |        | HealthMonitor     |  (ordering, skip)
//!                 through  |        | RateLimiter       |
//!                          |        | RetryPolicy       |
//!                          |        +-------------------+
//!                          |                  |
//!                          |                  v
//!                          |        +-------------------+
//!                          +------- |    Provider       |
//!                                   +-------------------+
//! ```
//!
//! # Core Types
//!
//! - [`CacheKey`] - Dataset, symbol and normalized query parameters
//! - [`Bar`] - One time-series row
//! - [`ResolvedSeries`] - Rows plus where they came from and whether they are stale
//! - [`ProviderOrchestrator`] - Entry point for resolving series
//! - [`HealthMonitor`] - Process-wide provider health, injected at construction
//!
//! # Type Aliases
//!
//! - [`ProviderId`] - Provider identifier (e.g., "TUSHARE", "YAHOO")
//! - [`Symbol`] - Normalized instrument symbol

pub mod cache;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats, TieredCache, TtlPolicy};
pub use errors::{MarketDataError, RetryClass};
pub use models::{
    Bar, CacheKey, DatasetType, PriceAdjustment, ProviderId, QueryParams, ResolvedSeries,
    SeriesRequest, SeriesSource, Symbol,
};
pub use provider::{MarketDataProvider, ProviderCapabilities, RateLimit};
pub use registry::{
    AttemptOutcome, FetchDiagnostics, HealthConfig, HealthMonitor, HealthSnapshot, HealthState,
    OrchestratorConfig, ProviderDescriptor, ProviderOrchestrator, RateLimitConfig, RetryConfig,
    SkipReason,
};
