use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use quantdesk_market_data::Bar;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::Inputs;

/// Indicator name, mostly static constants.
pub type IndicatorName = Cow<'static, str>;

/// One value per bar. `None` where the value is not defined.
pub type Column = Vec<Option<Decimal>>;

/// Computes an indicator column from its declared inputs.
pub type ComputeFn = Arc<dyn Fn(&Inputs<'_>) -> Column + Send + Sync>;

/// Raw bar field an indicator can read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl Field {
    /// Value of this field on `bar`, `None` when the row does not carry it.
    pub fn extract(&self, bar: &Bar) -> Option<Decimal> {
        match self {
            Self::Open => bar.open,
            Self::High => bar.high,
            Self::Low => bar.low,
            Self::Close => Some(bar.close),
            Self::Volume => bar.volume,
        }
    }
}

/// Something an indicator reads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dependency {
    Field(Field),
    Indicator(IndicatorName),
}

/// A registered indicator: name, inputs, minimum history and the function
/// computing it.
///
/// `lookback` is the number of rows needed before the latest value is
/// defined, counting the history its dependencies need.
#[derive(Clone)]
pub struct IndicatorSpec {
    pub name: IndicatorName,
    pub dependencies: Vec<Dependency>,
    pub lookback: usize,
    compute: ComputeFn,
}

impl IndicatorSpec {
    pub fn new<F>(name: impl Into<IndicatorName>, lookback: usize, compute: F) -> Self
    where
        F: Fn(&Inputs<'_>) -> Column + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            lookback,
            compute: Arc::new(compute),
        }
    }

    /// Declare a raw field input.
    pub fn reads(mut self, field: Field) -> Self {
        self.dependencies.push(Dependency::Field(field));
        self
    }

    /// Declare another indicator as input.
    pub fn depends_on(mut self, indicator: impl Into<IndicatorName>) -> Self {
        self.dependencies
            .push(Dependency::Indicator(indicator.into()));
        self
    }

    pub fn indicator_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().filter_map(|dep| match dep {
            Dependency::Indicator(name) => Some(name.as_ref()),
            Dependency::Field(_) => None,
        })
    }

    pub fn field_dependencies(&self) -> impl Iterator<Item = Field> + '_ {
        self.dependencies.iter().filter_map(|dep| match dep {
            Dependency::Field(field) => Some(*field),
            Dependency::Indicator(_) => None,
        })
    }

    pub(crate) fn evaluate(&self, inputs: &Inputs<'_>) -> Column {
        (self.compute)(inputs)
    }
}

impl fmt::Debug for IndicatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicatorSpec")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("lookback", &self.lookback)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_close_only_bar_fields() {
        let bar = Bar::new(Utc::now(), dec!(12.5));
        assert_eq!(Field::Close.extract(&bar), Some(dec!(12.5)));
        assert_eq!(Field::High.extract(&bar), None);
        assert_eq!(Field::Open.extract(&bar), None);
        assert_eq!(Field::Volume.extract(&bar), None);
    }

    #[test]
    fn test_builder_collects_dependencies() {
        let spec = IndicatorSpec::new("spread", 1, |inputs| inputs.field(Field::Close).to_vec())
            .reads(Field::High)
            .reads(Field::Low)
            .depends_on("ma5");

        assert_eq!(spec.indicator_dependencies().collect::<Vec<_>>(), vec!["ma5"]);
        assert_eq!(
            spec.field_dependencies().collect::<Vec<_>>(),
            vec![Field::High, Field::Low]
        );
    }
}
