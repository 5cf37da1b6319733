//! Quantdesk Core - configuration and the analysis facade.
//!
//! This crate loads [`AppConfig`] and assembles the market data stack
//! (tiered cache, health monitor, provider orchestrator) together with the
//! standard indicator engine behind [`AnalysisService`].

pub mod analysis;
pub mod config;
pub mod constants;
pub mod errors;

pub use analysis::{
    AnalysisRequest, AnalysisResult, AnalysisService, AnalysisServiceTrait, Freshness, SeriesInfo,
};
pub use config::{AppConfig, ProviderSettings};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
