//! First-success linear walk
//!
//! Scans (profile, count) pairs in declared order, profile outermost and
//! count fastest, at the lowest throughput until one passes. Once a pair
//! works it is kept and only the throughput is raised, until a step fails
//! or the throughput list is exhausted. The last passing configuration is
//! the recommendation.

use super::StepStrategy;
use crate::models::{params, Configuration, Plan, PlanError};
use tracing::{debug, info};

/// Builder for [`LinearWalk`] with custom walk dimensions
#[derive(Debug, Clone)]
pub struct LinearWalkBuilder {
    profile_dimension: String,
    count_dimension: String,
    throughput_dimension: String,
}

impl Default for LinearWalkBuilder {
    fn default() -> Self {
        Self {
            profile_dimension: params::INSTANCE_TYPE.to_string(),
            count_dimension: params::INITIAL_INSTANCE_COUNT.to_string(),
            throughput_dimension: params::STEADY_STATE_TPS.to_string(),
        }
    }
}

impl LinearWalkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile_dimension(mut self, name: impl Into<String>) -> Self {
        self.profile_dimension = name.into();
        self
    }

    pub fn count_dimension(mut self, name: impl Into<String>) -> Self {
        self.count_dimension = name.into();
        self
    }

    pub fn throughput_dimension(mut self, name: impl Into<String>) -> Self {
        self.throughput_dimension = name.into();
        self
    }

    /// Validate the plan and build the strategy
    ///
    /// Every dimension other than the three walked ones must be fixed.
    pub fn build(self, plan: &Plan) -> Result<LinearWalk, PlanError> {
        let profiles = plan.dimension(&self.profile_dimension)?.values.clone();
        let counts = plan.dimension(&self.count_dimension)?.values.clone();
        let throughputs = plan.dimension(&self.throughput_dimension)?.values.clone();

        plan.require_fixed_except(&[
            &self.profile_dimension,
            &self.count_dimension,
            &self.throughput_dimension,
        ])?;

        Ok(LinearWalk {
            base: plan.base_configuration(),
            profile_dimension: self.profile_dimension,
            count_dimension: self.count_dimension,
            throughput_dimension: self.throughput_dimension,
            profiles,
            counts,
            throughputs,
            profile_index: 0,
            count_index: 0,
            throughput_index: 0,
            found_success: false,
            finished: false,
        })
    }
}

/// Linear-walk step strategy
#[derive(Debug, Clone)]
pub struct LinearWalk {
    base: Configuration,
    profile_dimension: String,
    count_dimension: String,
    throughput_dimension: String,
    profiles: Vec<String>,
    counts: Vec<String>,
    throughputs: Vec<String>,
    profile_index: usize,
    count_index: usize,
    throughput_index: usize,
    found_success: bool,
    finished: bool,
}

impl LinearWalk {
    /// Walk over instance type, initial instance count and steady-state TPS
    pub fn new(plan: &Plan) -> Result<Self, PlanError> {
        LinearWalkBuilder::default().build(plan)
    }

    pub fn builder() -> LinearWalkBuilder {
        LinearWalkBuilder::default()
    }

    pub fn found_success(&self) -> bool {
        self.found_success
    }

    /// (profile, count, throughput) indices currently in effect
    pub fn indices(&self) -> (usize, usize, usize) {
        (self.profile_index, self.count_index, self.throughput_index)
    }

    fn current(&self) -> Configuration {
        self.base
            .with(&self.profile_dimension, &self.profiles[self.profile_index])
            .with(&self.count_dimension, &self.counts[self.count_index])
            .with(&self.throughput_dimension, &self.throughputs[self.throughput_index])
    }

    fn finish(&mut self, reason: &str) -> Option<Configuration> {
        self.finished = true;
        info!(
            strategy = self.name(),
            found_success = self.found_success,
            reason = %reason,
            "Linear walk finished"
        );
        None
    }

    /// Move to the next (profile, count) pair, count fastest
    fn advance_shape(&mut self) -> bool {
        self.count_index += 1;
        if self.count_index < self.counts.len() {
            return true;
        }
        self.count_index = 0;
        self.profile_index += 1;
        self.profile_index < self.profiles.len()
    }
}

impl StepStrategy for LinearWalk {
    fn name(&self) -> &'static str {
        "linear_walk"
    }

    fn next(&mut self, plan: &mut Plan) -> Option<Configuration> {
        if self.finished {
            return None;
        }

        if let Some((previous, run)) = plan.last_run() {
            let passed = run.is_success();
            let previous = previous.clone();

            if passed {
                self.found_success = true;
                plan.set_recommendation(previous);
            }

            if self.found_success {
                if !passed {
                    return self.finish("failure after success, keeping last passing throughput");
                }
                self.throughput_index += 1;
                if self.throughput_index >= self.throughputs.len() {
                    return self.finish("throughput list exhausted");
                }
            } else if !self.advance_shape() {
                return self.finish("no profile and count combination passed");
            }
        }

        let configuration = self.current();
        debug!(
            strategy = self.name(),
            profile = %self.profiles[self.profile_index],
            count = %self.counts[self.count_index],
            throughput = %self.throughputs[self.throughput_index],
            "Selected next configuration"
        );
        plan.select(configuration.clone());
        Some(configuration)
    }
}
