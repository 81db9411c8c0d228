//! Binary search for the smallest working autoscaling floor
//!
//! Assumes a monotonic pass/fail boundary: a higher minimum instance count
//! is at least as likely to pass. `lower` only moves up to confirmed
//! failures and `upper` only moves down to confirmed passes. The search
//! stops as soon as the midpoint repeats an already tested candidate.

use super::StepStrategy;
use crate::models::{params, Configuration, Plan, PlanError};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Boundary (binary-search) step strategy
#[derive(Debug, Clone)]
pub struct BoundarySearch {
    base: Configuration,
    floor_dimension: String,
    lower: u32,
    upper: u32,
    tested: BTreeSet<u32>,
    current: Option<u32>,
    finished: bool,
}

impl BoundarySearch {
    /// Search `scaling_min_instance_count` below `scaling_max_instance_count`
    pub fn new(plan: &Plan) -> Result<Self, PlanError> {
        Self::over(
            plan,
            params::SCALING_MIN_INSTANCE_COUNT,
            params::SCALING_MAX_INSTANCE_COUNT,
        )
    }

    /// Search `floor_dimension` with the known-good maximum taken from `ceiling_dimension`
    ///
    /// Every dimension except the floor must have exactly one value, and the
    /// ceiling must be a positive integer.
    pub fn over(plan: &Plan, floor_dimension: &str, ceiling_dimension: &str) -> Result<Self, PlanError> {
        plan.dimension(floor_dimension)?;
        plan.require_fixed_except(&[floor_dimension])?;

        let raw = plan.single_value(ceiling_dimension)?;
        let upper: u32 = raw.parse().map_err(|_| PlanError::InvalidValue {
            name: ceiling_dimension.to_string(),
            value: raw.to_string(),
            reason: "expected a positive integer".to_string(),
        })?;
        if upper == 0 {
            return Err(PlanError::InvalidValue {
                name: ceiling_dimension.to_string(),
                value: raw.to_string(),
                reason: "expected a positive integer".to_string(),
            });
        }

        // Zero instances is never a candidate floor.
        let tested = BTreeSet::from([0]);

        Ok(Self {
            base: plan.base_configuration(),
            floor_dimension: floor_dimension.to_string(),
            lower: 0,
            upper,
            tested,
            current: None,
            finished: false,
        })
    }

    pub fn lower(&self) -> u32 {
        self.lower
    }

    pub fn upper(&self) -> u32 {
        self.upper
    }

    /// Candidates emitted so far
    pub fn tested(&self) -> impl Iterator<Item = u32> + '_ {
        self.tested.iter().copied().filter(|c| *c != 0)
    }
}

impl StepStrategy for BoundarySearch {
    fn name(&self) -> &'static str {
        "boundary_search"
    }

    fn next(&mut self, plan: &mut Plan) -> Option<Configuration> {
        if self.finished {
            return None;
        }

        if let (Some(previous_candidate), Some((previous, run))) = (self.current, plan.last_run()) {
            if run.is_success() {
                self.upper = previous_candidate;
                let previous = previous.clone();
                plan.set_recommendation(previous);
            } else {
                self.lower = previous_candidate;
            }
        }

        let candidate = (self.lower + self.upper) / 2;
        if self.tested.contains(&candidate) {
            self.finished = true;
            info!(
                strategy = self.name(),
                lower = self.lower,
                upper = self.upper,
                candidate = candidate,
                "Boundary search converged"
            );
            return None;
        }

        self.tested.insert(candidate);
        self.current = Some(candidate);

        debug!(
            strategy = self.name(),
            lower = self.lower,
            upper = self.upper,
            candidate = candidate,
            "Selected next floor candidate"
        );

        let configuration = self.base.with(&self.floor_dimension, candidate.to_string());
        plan.select(configuration.clone());
        Some(configuration)
    }
}
