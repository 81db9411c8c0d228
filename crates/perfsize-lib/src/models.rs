//! Core data models for capacity sizing
//!
//! A [`Plan`] owns the search space (dimensions and requirements), the
//! history of configurations that were actually tested, and the running
//! recommendation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Well-known parameter names used across plans, strategies and the reconciler
pub mod params {
    pub const HOST: &str = "host";
    pub const REGION: &str = "region";
    pub const ENDPOINT_NAME: &str = "endpoint_name";
    pub const ENDPOINT_CONFIG_NAME: &str = "endpoint_config_name";
    pub const VARIANT_NAME: &str = "variant_name";
    pub const MODEL_NAME: &str = "model_name";
    pub const INSTANCE_TYPE: &str = "instance_type";
    pub const INITIAL_INSTANCE_COUNT: &str = "initial_instance_count";
    pub const SCALING_ENABLED: &str = "scaling_enabled";
    pub const SCALING_MIN_INSTANCE_COUNT: &str = "scaling_min_instance_count";
    pub const SCALING_MAX_INSTANCE_COUNT: &str = "scaling_max_instance_count";
    pub const SCALING_METRIC: &str = "scaling_metric";
    pub const SCALING_TARGET: &str = "scaling_target";
    pub const RAMP_START_TPS: &str = "ramp_start_tps";
    pub const RAMP_MINUTES: &str = "ramp_minutes";
    pub const STEADY_STATE_TPS: &str = "steady_state_tps";
    pub const STEADY_STATE_MINUTES: &str = "steady_state_minutes";
    pub const SCENARIO_REQUESTS: &str = "scenario_requests";
}

/// Errors raised while building or mutating a plan
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("dimension {0} is declared more than once")]
    DuplicateDimension(String),

    #[error("dimension {0} has no candidate values")]
    EmptyDimension(String),

    #[error("dimension {0} is not declared in the plan")]
    MissingDimension(String),

    #[error("dimension {name} must have exactly one value, got {count}")]
    NotSingleValued { name: String, count: usize },

    #[error("parameter {name} has invalid value {value:?}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("configuration is missing parameter {0}")]
    MissingParameter(String),

    #[error("no configuration is pending a run")]
    NothingPending,
}

/// A named search axis with its ordered candidate values
///
/// Order defines traversal order, not magnitude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub values: Vec<String>,
}

impl Dimension {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Single-valued dimension
    pub fn fixed(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, [value.into()])
    }
}

/// One fully specified point in the search space
///
/// Two configurations with the same (parameter, value) pairs are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    parameters: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new(parameters: BTreeMap<String, String>) -> Self {
        Self { parameters }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Look up a parameter that must be present
    pub fn require(&self, name: &str) -> Result<&str, PlanError> {
        self.get(name)
            .ok_or_else(|| PlanError::MissingParameter(name.to_string()))
    }

    /// Parse a parameter into any `FromStr` type
    pub fn parse<T>(&self, name: &str) -> Result<T, PlanError>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.require(name)?;
        raw.parse().map_err(|e: T::Err| PlanError::InvalidValue {
            name: name.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }

    /// Copy of this configuration with one parameter replaced
    pub fn with(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut parameters = self.parameters.clone();
        parameters.insert(name.into(), value.into());
        Self { parameters }
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Configuration
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            parameters: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .parameters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

/// Comparison operator applied between a measured value and a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
}

impl Comparison {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
            Comparison::Eq => value == threshold,
            Comparison::Ne => value != threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

/// Threshold check with a human readable label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub comparison: Comparison,
    pub threshold: f64,
    pub label: String,
}

impl Condition {
    pub fn new(comparison: Comparison, threshold: f64, label: impl Into<String>) -> Self {
        Self {
            comparison,
            threshold,
            label: label.into(),
        }
    }

    pub fn lt(threshold: f64, label: impl Into<String>) -> Self {
        Self::new(Comparison::Lt, threshold, label)
    }

    pub fn lte(threshold: f64, label: impl Into<String>) -> Self {
        Self::new(Comparison::Lte, threshold, label)
    }

    pub fn gt(threshold: f64, label: impl Into<String>) -> Self {
        Self::new(Comparison::Gt, threshold, label)
    }

    pub fn gte(threshold: f64, label: impl Into<String>) -> Self {
        Self::new(Comparison::Gte, threshold, label)
    }

    pub fn holds(&self, value: f64) -> bool {
        self.comparison.apply(value, self.threshold)
    }
}

/// A metric together with every condition it must satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub metric: String,
    pub conditions: Vec<Condition>,
}

impl Requirement {
    pub fn new(metric: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Self {
            metric: metric.into(),
            conditions,
        }
    }
}

/// One measured metric value judged against its requirement conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric: String,
    /// `None` when the load generator did not report this metric
    pub value: Option<f64>,
    pub conditions: Vec<Condition>,
}

impl MetricResult {
    pub fn is_success(&self) -> bool {
        match self.value {
            Some(value) => self.conditions.iter().all(|c| c.holds(value)),
            None => false,
        }
    }

    /// Conditions this result violates
    pub fn violations(&self) -> Vec<&Condition> {
        match self.value {
            Some(value) => self.conditions.iter().filter(|c| !c.holds(value)).collect(),
            None => self.conditions.iter().collect(),
        }
    }
}

/// One timed load-generation attempt against a configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<MetricResult>,
}

impl Run {
    /// A run passes when it judged at least one metric and nothing failed
    pub fn is_success(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(MetricResult::is_success)
    }

    pub fn result(&self, metric: &str) -> Option<&MetricResult> {
        self.results.iter().find(|r| r.metric == metric)
    }
}

/// A configuration that has been tested at least once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestedConfiguration {
    pub configuration: Configuration,
    pub runs: Vec<Run>,
}

impl TestedConfiguration {
    pub fn last_run(&self) -> Option<&Run> {
        self.runs.last()
    }
}

/// Search space, history and recommendation for one sizing search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    dimensions: Vec<Dimension>,
    requirements: Vec<Requirement>,
    history: Vec<TestedConfiguration>,
    #[serde(skip)]
    pending: Option<Configuration>,
    recommendation: Option<Configuration>,
}

impl Plan {
    pub fn new(dimensions: Vec<Dimension>, requirements: Vec<Requirement>) -> Result<Self, PlanError> {
        let mut seen = HashSet::new();
        for dimension in &dimensions {
            if !seen.insert(dimension.name.as_str()) {
                return Err(PlanError::DuplicateDimension(dimension.name.clone()));
            }
            if dimension.values.is_empty() {
                return Err(PlanError::EmptyDimension(dimension.name.clone()));
            }
        }

        Ok(Self {
            dimensions,
            requirements,
            history: Vec::new(),
            pending: None,
            recommendation: None,
        })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Result<&Dimension, PlanError> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| PlanError::MissingDimension(name.to_string()))
    }

    /// Value of a dimension that must have exactly one candidate
    pub fn single_value(&self, name: &str) -> Result<&str, PlanError> {
        let dimension = self.dimension(name)?;
        match dimension.values.as_slice() {
            [only] => Ok(only.as_str()),
            values => Err(PlanError::NotSingleValued {
                name: name.to_string(),
                count: values.len(),
            }),
        }
    }

    /// Ensure every dimension other than `walked` has a single value
    pub fn require_fixed_except(&self, walked: &[&str]) -> Result<(), PlanError> {
        for dimension in &self.dimensions {
            if walked.contains(&dimension.name.as_str()) {
                continue;
            }
            self.single_value(&dimension.name)?;
        }
        Ok(())
    }

    /// Configuration made of the first value of every dimension
    pub fn base_configuration(&self) -> Configuration {
        self.dimensions
            .iter()
            .map(|d| (d.name.clone(), d.values[0].clone()))
            .collect()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn history(&self) -> &[TestedConfiguration] {
        &self.history
    }

    /// Most recent run of the most recently tested configuration
    pub fn last_run(&self) -> Option<(&Configuration, &Run)> {
        let entry = self.history.last()?;
        entry.last_run().map(|run| (&entry.configuration, run))
    }

    /// Mark a configuration as the one about to be tested
    pub fn select(&mut self, configuration: Configuration) {
        self.pending = Some(configuration);
    }

    pub fn pending(&self) -> Option<&Configuration> {
        self.pending.as_ref()
    }

    /// Record a run against the pending configuration and move it into history
    pub fn record_run(&mut self, run: Run) -> Result<&TestedConfiguration, PlanError> {
        let configuration = self.pending.take().ok_or(PlanError::NothingPending)?;

        let repeat = self
            .history
            .last()
            .map(|entry| entry.configuration == configuration)
            .unwrap_or(false);

        if repeat {
            if let Some(entry) = self.history.last_mut() {
                entry.runs.push(run);
            }
        } else {
            self.history.push(TestedConfiguration {
                configuration,
                runs: vec![run],
            });
        }

        self.history.last().ok_or(PlanError::NothingPending)
    }

    pub fn recommendation(&self) -> Option<&Configuration> {
        self.recommendation.as_ref()
    }

    pub fn set_recommendation(&mut self, configuration: Configuration) {
        self.recommendation = Some(configuration);
    }

    pub fn total_runs(&self) -> usize {
        self.history.iter().map(|entry| entry.runs.len()).sum()
    }
}
