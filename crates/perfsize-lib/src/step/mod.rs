//! Step strategies
//!
//! A step strategy decides which configuration of a [`Plan`] to test next
//! from the history of previous runs, or declares the search finished.
//! Strategies are explicit state machines constructed once per plan; they
//! record the configuration they emit as pending on the plan and update the
//! plan's recommendation as verdicts come in.

mod boundary;
mod linear_walk;


pub use boundary::BoundarySearch;
pub use linear_walk::{LinearWalk, LinearWalkBuilder};

use crate::models::{Configuration, Plan};

/// Trait for search strategies driving a sizing plan
pub trait StepStrategy: Send {
    /// Short name used in logs and reports
    fn name(&self) -> &'static str;

    /// Pick the next configuration to test, or `None` when the search is done
    fn next(&mut self, plan: &mut Plan) -> Option<Configuration>;
}
