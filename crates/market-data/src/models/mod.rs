//! Market data models
//!
//! This module contains the core data types for market data operations:
//! - `types` - Type aliases for common identifiers (ProviderId, Symbol)
//! - `dataset` - Dataset categories and their default cache lifetimes (DatasetType)
//! - `key` - Request identity (QueryParams, CacheKey, SeriesRequest)
//! - `bar` - Time-series rows returned by providers (Bar)
//! - `series` - Resolved series handed back to callers (ResolvedSeries, SeriesSource)

mod bar;
mod dataset;
mod key;
mod series;
mod types;

pub use bar::Bar;
pub use dataset::DatasetType;
pub use key::{CacheKey, PriceAdjustment, QueryParams, SeriesRequest};
pub use series::{ResolvedSeries, SeriesSource};
pub use types::{ProviderId, Symbol};
