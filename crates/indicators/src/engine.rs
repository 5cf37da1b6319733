//! Lazy indicator evaluation.
//!
//! [`IndicatorEngine::compute`] plans the selection against the registry,
//! extracts only the raw fields the plan reads, and evaluates each planned
//! indicator once, in dependency order. Results are memoized for the
//! duration of the call so shared inputs (e.g. `ema12` under both MACD and
//! the trend score) are computed a single time.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use quantdesk_market_data::Bar;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::errors::{IndicatorError, Result};
use crate::registry::IndicatorRegistry;
use crate::spec::{Column, Field};

/// Which indicators to compute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    All,
    /// Indicator or group names.
    Only(BTreeSet<String>),
}

impl Selection {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(names.into_iter().map(Into::into).collect())
    }
}

/// Latest value of one indicator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndicatorValue {
    Value { value: Decimal },
    /// The series is shorter than the indicator (or one of its inputs) needs.
    InsufficientData { required: usize, available: usize },
    /// Enough rows, but the latest value is not defined. Usually a field the
    /// indicator reads is absent from the recent rows.
    Undefined { available: usize },
}

impl IndicatorValue {
    pub fn value(&self) -> Option<Decimal> {
        match self {
            Self::Value { value } => Some(*value),
            Self::InsufficientData { .. } | Self::Undefined { .. } => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined { .. })
    }
}

/// Output of one [`IndicatorEngine::compute`] call.
#[derive(Clone, Debug, Serialize)]
pub struct IndicatorReport {
    /// Number of rows the indicators were computed over.
    pub rows: usize,
    /// Timestamp of the last row.
    pub as_of: Option<DateTime<Utc>>,
    /// Latest value of each selected indicator.
    pub values: BTreeMap<String, IndicatorValue>,
    /// Full columns of each selected indicator, aligned to the input rows.
    pub columns: BTreeMap<String, Column>,
    /// Indicators actually evaluated, in evaluation order. Includes
    /// intermediates; excludes indicators skipped for insufficient data.
    pub evaluated: Vec<String>,
}

impl IndicatorReport {
    pub fn get(&self, name: &str) -> Option<&IndicatorValue> {
        self.values.get(name)
    }

    /// Latest value of `name`, if selected and defined.
    pub fn value(&self, name: &str) -> Option<Decimal> {
        self.values.get(name).and_then(IndicatorValue::value)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<Decimal>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// How many times `name` was evaluated during the call.
    pub fn evaluation_count(&self, name: &str) -> usize {
        self.evaluated.iter().filter(|n| *n == name).count()
    }
}

struct Evaluated {
    column: Column,
    required: usize,
    insufficient: bool,
}

/// Columns available to the indicator being evaluated.
///
/// Holds the fields read anywhere in the plan and the indicators evaluated so
/// far. Anything else reads as an empty column.
pub struct Inputs<'a> {
    rows: usize,
    fields: &'a HashMap<Field, Column>,
    indicators: &'a HashMap<&'a str, Evaluated>,
}

impl<'a> Inputs<'a> {
    /// Number of rows in the series.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn field(&self, field: Field) -> &'a [Option<Decimal>] {
        self.fields.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn indicator(&self, name: &str) -> &'a [Option<Decimal>] {
        self.indicators
            .get(name)
            .map(|e| e.column.as_slice())
            .unwrap_or(&[])
    }
}

/// Evaluates indicator selections over a bar series.
#[derive(Clone, Debug)]
pub struct IndicatorEngine {
    registry: Arc<IndicatorRegistry>,
}

impl IndicatorEngine {
    /// Validates the registry; a cyclic or dangling graph is rejected here
    /// rather than on first use.
    pub fn new(registry: IndicatorRegistry) -> Result<Self> {
        registry.validate()?;
        Ok(Self {
            registry: Arc::new(registry),
        })
    }

    /// Engine over the standard indicator library.
    pub fn standard() -> Result<Self> {
        Self::new(crate::builtin::standard_registry()?)
    }

    pub fn registry(&self) -> &IndicatorRegistry {
        &self.registry
    }

    /// Compute `selection` over `bars`, which must be in chronological order.
    pub fn compute(&self, bars: &[Bar], selection: &Selection) -> Result<IndicatorReport> {
        let roots: Vec<&str> = match selection {
            Selection::All => self.registry.names(),
            Selection::Only(names) => {
                let mut roots = Vec::new();
                for name in names {
                    for member in self.registry.expand(name)? {
                        if !roots.contains(&member) {
                            roots.push(member);
                        }
                    }
                }
                roots
            }
        };

        let plan = self.registry.plan(&roots)?;
        let rows = bars.len();

        let needed_fields: BTreeSet<Field> =
            plan.iter().flat_map(|spec| spec.field_dependencies()).collect();
        let fields: HashMap<Field, Column> = needed_fields
            .into_iter()
            .map(|field| {
                let column = bars.iter().map(|bar| field.extract(bar)).collect();
                (field, column)
            })
            .collect();

        let mut memo: HashMap<&str, Evaluated> = HashMap::with_capacity(plan.len());
        let mut evaluated = Vec::new();

        for &spec in &plan {
            let name = spec.name.as_ref();
            let mut required = spec.lookback;
            let mut upstream_insufficient = false;
            for dependency in spec.indicator_dependencies() {
                if let Some(dep) = memo.get(dependency) {
                    required = required.max(dep.required);
                    upstream_insufficient |= dep.insufficient;
                }
            }

            if upstream_insufficient || rows < required {
                debug!(
                    "Skipping indicator '{}': needs {} rows, have {}",
                    name, required, rows
                );
                memo.insert(
                    name,
                    Evaluated {
                        column: vec![None; rows],
                        required,
                        insufficient: true,
                    },
                );
                continue;
            }

            let column = {
                let inputs = Inputs {
                    rows,
                    fields: &fields,
                    indicators: &memo,
                };
                spec.evaluate(&inputs)
            };
            if column.len() != rows {
                return Err(IndicatorError::ColumnLength {
                    indicator: name.to_string(),
                    expected: rows,
                    actual: column.len(),
                });
            }

            evaluated.push(name.to_string());
            memo.insert(
                name,
                Evaluated {
                    column,
                    required,
                    insufficient: false,
                },
            );
        }

        let mut values = BTreeMap::new();
        let mut columns = BTreeMap::new();
        for root in roots {
            let Some(entry) = memo.remove(root) else {
                continue;
            };
            let value = match entry.column.last().copied().flatten() {
                _ if entry.insufficient || rows == 0 => IndicatorValue::InsufficientData {
                    required: entry.required,
                    available: rows,
                },
                Some(value) => IndicatorValue::Value { value },
                None => IndicatorValue::Undefined { available: rows },
            };
            values.insert(root.to_string(), value);
            columns.insert(root.to_string(), entry.column);
        }

        Ok(IndicatorReport {
            rows,
            as_of: bars.last().map(|bar| bar.timestamp),
            values,
            columns,
            evaluated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use crate::math;
    use crate::spec::IndicatorSpec;

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64);
                Bar::new(ts, Decimal::from(i as i64 + 1))
            })
            .collect()
    }

    fn counting_registry(counter: Arc<AtomicUsize>) -> IndicatorRegistry {
        let mut registry = IndicatorRegistry::new();
        registry
            .register(
                IndicatorSpec::new("base", 3, move |inputs| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    math::sma(inputs.field(Field::Close), 3)
                })
                .reads(Field::Close),
            )
            .unwrap();
        registry
            .register(
                IndicatorSpec::new("double", 3, |inputs| {
                    inputs
                        .indicator("base")
                        .iter()
                        .map(|v| v.map(|v| v * dec!(2)))
                        .collect()
                })
                .depends_on("base"),
            )
            .unwrap();
        registry
            .register(
                IndicatorSpec::new("offset", 3, |inputs| {
                    inputs
                        .indicator("base")
                        .iter()
                        .map(|v| v.map(|v| v + dec!(1)))
                        .collect()
                })
                .depends_on("base"),
            )
            .unwrap();
        registry
            .register(
                IndicatorSpec::new("long", 50, |inputs| math::sma(inputs.field(Field::Close), 50))
                    .reads(Field::Close),
            )
            .unwrap();
        registry
            .register(
                IndicatorSpec::new("after_long", 1, |inputs| inputs.indicator("long").to_vec())
                    .depends_on("long"),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_shared_dependency_computed_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let engine = IndicatorEngine::new(counting_registry(counter.clone())).unwrap();

        let report = engine
            .compute(&bars(10), &Selection::only(["double", "offset"]))
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(report.evaluation_count("base"), 1);
        assert_eq!(report.value("double"), Some(dec!(18)));
        assert_eq!(report.value("offset"), Some(dec!(10)));
        // Intermediates are not part of the result
        assert!(report.get("base").is_none());
    }

    #[test]
    fn test_unselected_indicators_are_not_computed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let engine = IndicatorEngine::new(counting_registry(counter.clone())).unwrap();

        let report = engine.compute(&bars(10), &Selection::only(["long"])).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(report.values.len(), 1);
    }

    #[test]
    fn test_insufficient_data_is_explicit_and_propagates() {
        let counter = Arc::new(AtomicUsize::new(0));
        let engine = IndicatorEngine::new(counting_registry(counter)).unwrap();

        let report = engine
            .compute(&bars(10), &Selection::only(["long", "after_long", "double"]))
            .unwrap();

        assert_eq!(
            report.get("long"),
            Some(&IndicatorValue::InsufficientData {
                required: 50,
                available: 10
            })
        );
        assert_eq!(
            report.get("after_long"),
            Some(&IndicatorValue::InsufficientData {
                required: 50,
                available: 10
            })
        );
        assert_eq!(report.evaluation_count("long"), 0);
        assert_eq!(report.evaluation_count("after_long"), 0);
        assert!(report.column("long").unwrap().iter().all(Option::is_none));
        assert!(!report.get("double").unwrap().is_insufficient());
    }

    #[test]
    fn test_unknown_selection_fails() {
        let engine =
            IndicatorEngine::new(counting_registry(Arc::new(AtomicUsize::new(0)))).unwrap();
        let err = engine
            .compute(&bars(5), &Selection::only(["nope"]))
            .unwrap_err();
        assert_eq!(err, IndicatorError::UnknownIndicator("nope".to_string()));
    }

    #[test]
    fn test_cyclic_registry_rejected_at_construction() {
        let mut registry = IndicatorRegistry::new();
        registry
            .register(IndicatorSpec::new("a", 1, |i| i.indicator("b").to_vec()).depends_on("b"))
            .unwrap();
        registry
            .register(IndicatorSpec::new("b", 1, |i| i.indicator("a").to_vec()).depends_on("a"))
            .unwrap();

        assert!(matches!(
            IndicatorEngine::new(registry),
            Err(IndicatorError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_wrong_column_length_is_an_error() {
        let mut registry = IndicatorRegistry::new();
        registry
            .register(IndicatorSpec::new("short", 1, |_| vec![None]))
            .unwrap();
        let engine = IndicatorEngine::new(registry).unwrap();

        assert!(matches!(
            engine.compute(&bars(3), &Selection::All),
            Err(IndicatorError::ColumnLength { expected: 3, actual: 1, .. })
        ));
    }

    #[test]
    fn test_empty_series() {
        let engine =
            IndicatorEngine::new(counting_registry(Arc::new(AtomicUsize::new(0)))).unwrap();
        let report = engine.compute(&[], &Selection::All).unwrap();

        assert_eq!(report.rows, 0);
        assert!(report.as_of.is_none());
        assert!(report.values.values().all(IndicatorValue::is_insufficient));
        assert!(report.evaluated.is_empty());
    }
}
