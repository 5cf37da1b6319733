//! Indicator engine error types.

use thiserror::Error;

/// Errors raised while registering, planning or evaluating indicators.
///
/// Insufficient history is not an error: it is reported per indicator as
/// [`IndicatorValue::InsufficientData`](crate::IndicatorValue::InsufficientData).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndicatorError {
    /// The selection names an indicator or group that is not registered.
    #[error("Unknown indicator: {0}")]
    UnknownIndicator(String),

    /// Two specs were registered under the same name.
    #[error("Indicator already registered: {0}")]
    DuplicateIndicator(String),

    /// A spec depends on an indicator that is not registered.
    #[error("Indicator '{indicator}' depends on unknown indicator '{dependency}'")]
    MissingDependency {
        indicator: String,
        dependency: String,
    },

    /// The dependency graph contains a cycle. `path` starts and ends with
    /// the same indicator.
    #[error("Dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    /// A compute function produced a column of the wrong length.
    #[error("Indicator '{indicator}' produced {actual} values for {expected} rows")]
    ColumnLength {
        indicator: String,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, IndicatorError>;
