//! Quantdesk Indicators Crate
//!
//! Lazy technical indicator computation over market data series.
//!
//! # Overview
//!
//! - Indicators are registered as [`IndicatorSpec`]s: a name, the fields and
//!   indicators they read, the history they need, and a compute function
//! - [`IndicatorRegistry::plan`] resolves a selection to the minimal set of
//!   specs in dependency order; cycles are rejected
//! - [`IndicatorEngine::compute`] evaluates only that set, once per indicator,
//!   and reports [`IndicatorValue::InsufficientData`] instead of guessing when
//!   the series is too short, or [`IndicatorValue::Undefined`] when a field it
//!   reads is missing
//!
//! # Example
//!
//! ```ignore
//! use quantdesk_indicators::{IndicatorEngine, Selection};
//!
//! let engine = IndicatorEngine::standard()?;
//! let report = engine.compute(&series.bars, &Selection::only(["macd", "rsi14"]))?;
//! let dif = report.value("macd_dif");
//! ```

pub mod builtin;
pub mod engine;
pub mod errors;
pub mod math;
pub mod registry;
pub mod spec;

pub use builtin::standard_registry;
pub use engine::{IndicatorEngine, IndicatorReport, IndicatorValue, Inputs, Selection};
pub use errors::{IndicatorError, Result};
pub use registry::IndicatorRegistry;
pub use spec::{Column, ComputeFn, Dependency, Field, IndicatorName, IndicatorSpec};
