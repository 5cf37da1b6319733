//! Market data provider abstractions.
//!
//! This module contains:
//! - The `MarketDataProvider` trait that all data sources implement
//! - Provider capabilities and rate limiting configuration
//!
//! Concrete HTTP sources live outside this crate; they only have to map
//! their transport errors onto [`MarketDataError`](crate::errors::MarketDataError).

mod capabilities;
mod traits;

pub use capabilities::{ProviderCapabilities, RateLimit};
pub use traits::MarketDataProvider;
