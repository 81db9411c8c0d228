//! Capacity sizing library for model hosting endpoints
//!
//! This crate provides the core functionality for:
//! - Search plans, runs and requirement evaluation
//! - Step strategies (linear walk, boundary search)
//! - Idempotent environment reconciliation
//! - Load generation seams
//! - The three-phase sizing campaign and cost estimates
//! - Metrics and structured logging

pub mod campaign;
pub mod cost;
pub mod environment;
pub mod evaluate;
pub mod load;
pub mod models;
pub mod observability;
pub mod step;
pub mod workflow;

pub use campaign::{Campaign, CampaignInputs, CampaignReport, EndpointTarget, ScenarioRequest};
pub use cost::CostEstimator;
pub use environment::{
    ControlPlane, ControlPlaneError, DesiredState, EndpointId, EndpointStatus, HttpControlPlane,
    InMemoryControlPlane, ReconcileError, Reconciler, RemoteResourceState, WaitConfig,
};
pub use load::{CommandLoadGenerator, LoadGenerator, LoadReport, SimulatedLoadGenerator};
pub use models::*;
pub use observability::{render_metrics, SizerMetrics, StructuredLogger};
pub use step::{BoundarySearch, LinearWalk, StepStrategy};
pub use workflow::Workflow;
