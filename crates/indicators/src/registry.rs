//! Indicator registry and dependency planning.
//!
//! Specs are registered by name and may reference each other. Named groups
//! (`"macd"`, `"boll"`, ...) expand to several indicators so callers can
//! select families without listing every member.
//!
//! [`IndicatorRegistry::plan`] returns the indicators needed for a selection in
//! dependency order, each exactly once.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;

use crate::errors::{IndicatorError, Result};
use crate::spec::{IndicatorName, IndicatorSpec};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Registered indicators and groups.
#[derive(Clone, Debug, Default)]
pub struct IndicatorRegistry {
    specs: HashMap<String, IndicatorSpec>,
    groups: BTreeMap<String, Vec<IndicatorName>>,
}

impl IndicatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spec. Dependencies may name specs registered later;
    /// [`validate`](Self::validate) checks the finished graph.
    pub fn register(&mut self, spec: IndicatorSpec) -> Result<()> {
        let name = spec.name.to_string();
        if self.specs.contains_key(&name) || self.groups.contains_key(&name) {
            return Err(IndicatorError::DuplicateIndicator(name));
        }
        self.specs.insert(name, spec);
        Ok(())
    }

    /// Register a group name expanding to `members`.
    pub fn register_group<I, N>(&mut self, name: impl Into<String>, members: I) -> Result<()>
    where
        I: IntoIterator<Item = N>,
        N: Into<IndicatorName>,
    {
        let name = name.into();
        if self.specs.contains_key(&name) || self.groups.contains_key(&name) {
            return Err(IndicatorError::DuplicateIndicator(name));
        }
        self.groups
            .insert(name, members.into_iter().map(Into::into).collect());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&IndicatorSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Registered indicator names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &[IndicatorName])> {
        self.groups
            .iter()
            .map(|(name, members)| (name.as_str(), members.as_slice()))
    }

    /// Resolve a selection entry to indicator names. A group expands to its
    /// members; an indicator name resolves to itself.
    pub fn expand(&self, name: &str) -> Result<Vec<&str>> {
        if let Some((key, _)) = self.specs.get_key_value(name) {
            return Ok(vec![key.as_str()]);
        }
        let members = self
            .groups
            .get(name)
            .ok_or_else(|| IndicatorError::UnknownIndicator(name.to_string()))?;

        members
            .iter()
            .map(|member| {
                self.specs
                    .get_key_value(member.as_ref())
                    .map(|(key, _)| key.as_str())
                    .ok_or_else(|| IndicatorError::UnknownIndicator(member.to_string()))
            })
            .collect()
    }

    /// Check that every dependency and group member exists and that the
    /// graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        for spec in self.specs.values() {
            for dependency in spec.indicator_dependencies() {
                if !self.specs.contains_key(dependency) {
                    return Err(IndicatorError::MissingDependency {
                        indicator: spec.name.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
            }
        }
        for group in self.groups.keys() {
            self.expand(group)?;
        }

        let roots = self.names();
        self.plan(&roots).map(|_| ())
    }

    /// Specs needed to evaluate `roots`, dependencies first.
    ///
    /// Order is deterministic: roots are visited in the order given and
    /// dependencies in declaration order.
    pub fn plan(&self, roots: &[&str]) -> Result<Vec<&IndicatorSpec>> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();
        let mut order = Vec::new();

        for root in roots {
            self.visit(root, &mut marks, &mut stack, &mut order)?;
        }

        debug!(
            "Indicator plan for {:?}: {:?}",
            roots,
            order.iter().map(|s| s.name.as_ref()).collect::<Vec<&str>>()
        );
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &str,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
        order: &mut Vec<&'a IndicatorSpec>,
    ) -> Result<()> {
        let (key, spec) = self
            .specs
            .get_key_value(name)
            .ok_or_else(|| IndicatorError::UnknownIndicator(name.to_string()))?;
        let key = key.as_str();

        match marks.get(key) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == key).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
                path.push(key.to_string());
                return Err(IndicatorError::DependencyCycle { path });
            }
            None => {}
        }

        marks.insert(key, Mark::Visiting);
        stack.push(key);
        for dependency in spec.indicator_dependencies() {
            if !self.specs.contains_key(dependency) {
                return Err(IndicatorError::MissingDependency {
                    indicator: key.to_string(),
                    dependency: dependency.to_string(),
                });
            }
            self.visit(dependency, marks, stack, order)?;
        }
        stack.pop();
        marks.insert(key, Mark::Done);
        order.push(spec);
        Ok(())
    }

    /// Names reachable from `roots`, including the roots.
    pub fn closure(&self, roots: &[&str]) -> Result<BTreeSet<&str>> {
        Ok(self
            .plan(roots)?
            .into_iter()
            .map(|spec| spec.name.as_ref())
            .collect())
    }
}
