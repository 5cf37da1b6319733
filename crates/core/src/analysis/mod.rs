//! Analysis facade: resolve a series, then compute indicators over it.

mod model;
mod service;
mod traits;

pub use model::{AnalysisRequest, AnalysisResult, Freshness, SeriesInfo};
pub use service::AnalysisService;
pub use traits::AnalysisServiceTrait;
