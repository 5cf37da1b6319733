//! Provider orchestration module.
//!
//! This module provides the resilience layer around market data providers:
//! - Per-provider health tracking with a three-state circuit
//! - Token-bucket rate limiting per provider
//! - Retry with exponential backoff for transient failures
//! - Row validation before caching
//! - Request coalescing (one in-flight fetch per key)
//! - The orchestrator tying these to the tiered cache

mod diagnostics;
mod health;
mod orchestrator;
mod rate_limiter;
mod retry;
mod ticket;
mod validator;

pub use health::{HealthConfig, HealthMonitor, HealthSnapshot, HealthState, Outcome};
pub use orchestrator::{
    MaintenanceHandles, OrchestratorConfig, ProviderDescriptor, ProviderOrchestrator,
};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::{RetryConfig, RetryPolicy};
pub use diagnostics::{AttemptOutcome, FetchDiagnostics, ProviderAttempt, SkipReason};
pub use ticket::{FetchOutcome, TicketBoard, TicketLease, TicketRole, TicketWaiter};
pub use validator::{BarValidator, ValidationIssue, ValidationSeverity, ValidatorConfig};
