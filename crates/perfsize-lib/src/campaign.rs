//! Three-phase sizing campaign
//!
//! 1. Instance type: linear walk over types, counts and throughputs to find
//!    the first working type and its throughput per instance.
//! 2. Maximum count: linear walk over counts around the extrapolated need at
//!    peak throughput for the endurance duration.
//! 3. Minimum count: boundary search over the autoscaling floor with ramped
//!    traffic. Skipped when one instance handles the peak.

use crate::cost::CostEstimator;
use crate::environment::{EndpointId, Reconciler, INVOCATIONS_PER_INSTANCE};
use crate::load::{metrics, LoadGenerator};
use crate::models::{params, Condition, Configuration, Dimension, Plan, Requirement};
use crate::observability::StructuredLogger;
use crate::step::{BoundarySearch, LinearWalk, StepStrategy};
use crate::workflow::Workflow;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Fraction of measured per-instance throughput used as the autoscaling target
pub const SAFETY_FACTOR: f64 = 0.5;

/// Allowed drift of the request mix weights from 100
const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Identity of the endpoint under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointTarget {
    pub host: String,
    pub region: String,
    pub endpoint_name: String,
    pub endpoint_config_name: String,
    pub variant_name: String,
    pub model_name: String,
}

impl EndpointTarget {
    pub fn id(&self) -> EndpointId {
        EndpointId::new(&self.endpoint_name, &self.endpoint_config_name)
    }

    fn dimensions(&self) -> Vec<Dimension> {
        vec![
            Dimension::fixed(params::HOST, &self.host),
            Dimension::fixed(params::REGION, &self.region),
            Dimension::fixed(params::ENDPOINT_NAME, &self.endpoint_name),
            Dimension::fixed(params::ENDPOINT_CONFIG_NAME, &self.endpoint_config_name),
            Dimension::fixed(params::VARIANT_NAME, &self.variant_name),
            Dimension::fixed(params::MODEL_NAME, &self.model_name),
        ]
    }
}

/// One payload file of the request mix and its share of the traffic in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRequest {
    pub path: PathBuf,
    pub weight: f64,
}

/// Everything a campaign needs to know up front
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignInputs {
    pub target: EndpointTarget,
    pub scenario_requests: Vec<ScenarioRequest>,
    pub peak_tps: f64,
    pub latency_success_p99: f64,
    pub percent_fail: f64,
    pub type_walk: Vec<String>,
    pub count_walk: Vec<u32>,
    pub tps_walk: Vec<f64>,
    pub duration_minutes: f64,
    pub endurance_ramp_start_tps: f64,
    pub endurance_ramp_minutes: f64,
    pub endurance_steady_state_minutes: f64,
    pub endurance_retries: u32,
}

impl CampaignInputs {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.peak_tps > 0.0, "peak_tps must be greater than 0");
        anyhow::ensure!(!self.type_walk.is_empty(), "type_walk must not be empty");
        anyhow::ensure!(!self.count_walk.is_empty(), "count_walk must not be empty");
        anyhow::ensure!(!self.tps_walk.is_empty(), "tps_walk must not be empty");
        anyhow::ensure!(
            self.count_walk.iter().all(|c| *c > 0),
            "count_walk values must be greater than 0"
        );
        anyhow::ensure!(
            self.tps_walk.iter().all(|t| *t > 0.0),
            "tps_walk values must be greater than 0"
        );
        self.validate_scenario_requests()
    }

    fn validate_scenario_requests(&self) -> Result<()> {
        anyhow::ensure!(
            !self.scenario_requests.is_empty(),
            "scenario_requests must contain at least one element"
        );
        for request in &self.scenario_requests {
            anyhow::ensure!(
                request.path.exists(),
                "scenario_requests path {} does not exist",
                request.path.display()
            );
            anyhow::ensure!(
                request.weight >= 0.0,
                "scenario_requests weight {} for {} must not be negative",
                request.weight,
                request.path.display()
            );
        }
        let total: f64 = self.scenario_requests.iter().map(|r| r.weight).sum();
        anyhow::ensure!(
            (total - 100.0).abs() <= WEIGHT_TOLERANCE,
            "scenario_requests weights must sum to 100, got {}",
            total
        );
        Ok(())
    }

    /// Latency and failure-rate limits applied in every phase
    pub fn requirements(&self) -> Vec<Requirement> {
        vec![
            Requirement::new(
                metrics::LATENCY_SUCCESS_P99,
                vec![
                    Condition::lt(
                        self.latency_success_p99,
                        format!("latency_success_p99 < {}", self.latency_success_p99),
                    ),
                    Condition::gte(0.0, "latency_success_p99 >= 0"),
                ],
            ),
            Requirement::new(
                metrics::PERCENT_FAIL,
                vec![
                    Condition::lt(self.percent_fail, format!("percent_fail < {}", self.percent_fail)),
                    Condition::gte(0.0, "percent_fail >= 0"),
                ],
            ),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeFinding {
    pub instance_type: String,
    pub initial_instance_count: u32,
    pub steady_state_tps: f64,
    pub tps_per_instance: f64,
    pub instance_count_needed: u32,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxCountFinding {
    pub max_instance_count: u32,
    pub max_steady_state_tps: f64,
    pub max_tps_per_instance: f64,
    pub invocations_target: u64,
    pub max_cost: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinCountFinding {
    pub min_instance_count: u32,
    pub min_cost: String,
    pub explanation: String,
}

/// Plans and findings of a campaign, partial when `error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub inputs: CampaignInputs,
    pub type_plan: Option<Plan>,
    pub max_count_plan: Option<Plan>,
    pub min_count_plan: Option<Plan>,
    pub type_finding: Option<TypeFinding>,
    pub max_count_finding: Option<MaxCountFinding>,
    pub min_count_finding: Option<MinCountFinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CampaignReport {
    /// Whether every phase that ran produced a finding
    pub fn is_complete(&self) -> bool {
        match (&self.type_finding, &self.max_count_finding) {
            (Some(_), Some(max)) => max.max_instance_count == 1 || self.min_count_finding.is_some(),
            _ => false,
        }
    }

    pub fn total_runs(&self) -> usize {
        [&self.type_plan, &self.max_count_plan, &self.min_count_plan]
            .into_iter()
            .flatten()
            .map(Plan::total_runs)
            .sum()
    }

    /// Write `report.json` into `dir`, returning its path
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create results directory: {}", dir.display()))?;
        let path = dir.join("report.json");
        let content = serde_json::to_string_pretty(self).context("Failed to serialize campaign report")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(path)
    }
}

/// Job identifier `job-<timestamp>-<model>`
pub fn job_id(model_name: &str, at: DateTime<Utc>) -> String {
    format!("job-{}-{}", at.format("%Y-%m-%d-%H%M%S"), model_name)
}

/// Runs the three phases against one endpoint
pub struct Campaign {
    inputs: CampaignInputs,
    reconciler: Reconciler,
    load: Arc<dyn LoadGenerator>,
    cost: CostEstimator,
    logger: StructuredLogger,
    results_dir: Option<PathBuf>,
}

impl Campaign {
    pub fn new(
        inputs: CampaignInputs,
        reconciler: Reconciler,
        load: Arc<dyn LoadGenerator>,
        cost: CostEstimator,
    ) -> Result<Self> {
        inputs.validate()?;
        let logger = StructuredLogger::new(job_id(&inputs.target.model_name, Utc::now()));
        Ok(Self {
            inputs,
            reconciler,
            load,
            cost,
            logger,
            results_dir: None,
        })
    }

    /// Save `report.json` into `dir` when the campaign ends, also on failure
    pub fn save_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = Some(dir.into());
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn job_id(&self) -> &str {
        self.logger.job_id()
    }

    /// Endpoint identity and request mix, shared by every phase
    fn base_dimensions(&self) -> Result<Vec<Dimension>> {
        let scenario_requests = serde_json::to_string(&self.inputs.scenario_requests)
            .context("Failed to serialize scenario_requests")?;
        let mut dimensions = self.inputs.target.dimensions();
        dimensions.push(Dimension::fixed(params::SCENARIO_REQUESTS, scenario_requests));
        Ok(dimensions)
    }

    pub fn type_plan(&self) -> Result<Plan> {
        let inputs = &self.inputs;
        let mut dimensions = self.base_dimensions()?;
        dimensions.extend([
            Dimension::new(params::INSTANCE_TYPE, inputs.type_walk.clone()),
            Dimension::new(params::INITIAL_INSTANCE_COUNT, inputs.count_walk.iter().map(u32::to_string)),
            Dimension::fixed(params::RAMP_START_TPS, "0"),
            Dimension::fixed(params::RAMP_MINUTES, "0"),
            Dimension::new(params::STEADY_STATE_TPS, inputs.tps_walk.iter().map(f64::to_string)),
            Dimension::fixed(params::STEADY_STATE_MINUTES, inputs.duration_minutes.to_string()),
        ]);
        Ok(Plan::new(dimensions, inputs.requirements())?)
    }

    pub fn max_count_plan(&self, instance_type: &str, instance_count_needed: u32) -> Result<Plan> {
        let inputs = &self.inputs;
        let counts = instance_count_needed..=instance_count_needed + inputs.endurance_retries;
        let mut dimensions = self.base_dimensions()?;
        dimensions.extend([
            Dimension::fixed(params::INSTANCE_TYPE, instance_type),
            Dimension::new(params::INITIAL_INSTANCE_COUNT, counts.map(|c| c.to_string())),
            Dimension::fixed(params::RAMP_START_TPS, "0"),
            Dimension::fixed(params::RAMP_MINUTES, "0"),
            Dimension::fixed(params::STEADY_STATE_TPS, inputs.peak_tps.to_string()),
            Dimension::fixed(
                params::STEADY_STATE_MINUTES,
                inputs.endurance_steady_state_minutes.to_string(),
            ),
        ]);
        Ok(Plan::new(dimensions, inputs.requirements())?)
    }

    /// Autoscaled plan; the initial instance count follows the floor
    pub fn min_count_plan(&self, instance_type: &str, max_instance_count: u32, invocations_target: u64) -> Result<Plan> {
        let inputs = &self.inputs;
        let mut dimensions = self.base_dimensions()?;
        dimensions.extend([
            Dimension::fixed(params::INSTANCE_TYPE, instance_type),
            Dimension::fixed(params::SCALING_ENABLED, "true"),
            Dimension::new(
                params::SCALING_MIN_INSTANCE_COUNT,
                (1..=max_instance_count).map(|c| c.to_string()),
            ),
            Dimension::fixed(params::SCALING_MAX_INSTANCE_COUNT, max_instance_count.to_string()),
            Dimension::fixed(params::SCALING_METRIC, INVOCATIONS_PER_INSTANCE),
            Dimension::fixed(params::SCALING_TARGET, invocations_target.to_string()),
            Dimension::fixed(params::RAMP_START_TPS, inputs.endurance_ramp_start_tps.to_string()),
            Dimension::fixed(params::RAMP_MINUTES, inputs.endurance_ramp_minutes.to_string()),
            Dimension::fixed(params::STEADY_STATE_TPS, inputs.peak_tps.to_string()),
            Dimension::fixed(
                params::STEADY_STATE_MINUTES,
                inputs.endurance_steady_state_minutes.to_string(),
            ),
        ]);
        Ok(Plan::new(dimensions, inputs.requirements())?)
    }

    /// Run every phase whose predecessor produced a finding
    pub async fn run(&self) -> Result<CampaignReport> {
        let started_at = Utc::now();
        let target = &self.inputs.target;
        self.logger
            .log_job_started(&target.model_name, &target.endpoint_name, self.inputs.peak_tps);

        let mut report = CampaignReport {
            job_id: self.job_id().to_string(),
            started_at,
            finished_at: started_at,
            inputs: self.inputs.clone(),
            type_plan: None,
            max_count_plan: None,
            min_count_plan: None,
            type_finding: None,
            max_count_finding: None,
            min_count_finding: None,
            error: None,
        };

        let result = self.run_phases(&mut report).await;
        report.finished_at = Utc::now();

        match result {
            Ok(()) => {
                let status = if report.is_complete() { "complete" } else { "incomplete" };
                self.logger.log_job_finished(status, report.total_runs());
                if let Some(dir) = &self.results_dir {
                    report.save(dir)?;
                }
                Ok(report)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                self.logger.log_job_failed(&message);
                report.error = Some(message);
                if let Some(dir) = &self.results_dir {
                    match report.save(dir) {
                        Ok(path) => info!(path = %path.display(), "Partial report saved"),
                        Err(save_error) => warn!(error = %format!("{:#}", save_error), "Failed to save partial report"),
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_phases(&self, report: &mut CampaignReport) -> Result<()> {
        let mut plan = self.type_plan()?;
        let strategy = LinearWalk::new(&plan)?;
        let recommendation = self.search("type", &mut plan, Box::new(strategy), false).await;
        report.type_plan = Some(plan);
        let Some(found) = recommendation? else {
            warn!("No instance type in the walk met the requirements");
            return Ok(());
        };
        let type_finding = self.type_finding(&found)?;
        let instance_type = type_finding.instance_type.clone();
        let needed = type_finding.instance_count_needed;
        report.type_finding = Some(type_finding);

        let mut plan = self.max_count_plan(&instance_type, needed)?;
        let strategy = LinearWalk::new(&plan)?;
        let recommendation = self.search("max_count", &mut plan, Box::new(strategy), true).await;
        report.max_count_plan = Some(plan);
        let Some(found) = recommendation? else {
            warn!("No instance count handled peak throughput");
            return Ok(());
        };
        let max_finding = self.max_count_finding(&instance_type, &found)?;
        let max_instance_count = max_finding.max_instance_count;
        let invocations_target = max_finding.invocations_target;
        report.max_count_finding = Some(max_finding);

        if max_instance_count == 1 {
            info!("One instance handles peak throughput, skipping autoscaling search");
            return Ok(());
        }

        let mut plan = self.min_count_plan(&instance_type, max_instance_count, invocations_target)?;
        let strategy = BoundarySearch::new(&plan)?;
        let recommendation = self.search("min_count", &mut plan, Box::new(strategy), true).await;
        report.min_count_plan = Some(plan);
        match recommendation? {
            Some(found) => {
                report.min_count_finding = Some(self.min_count_finding(&instance_type, max_instance_count, &found)?);
            }
            None => warn!("No autoscaling floor below the maximum met the requirements"),
        }
        Ok(())
    }

    async fn search(
        &self,
        phase: &str,
        plan: &mut Plan,
        strategy: Box<dyn StepStrategy>,
        teardown_between_steps: bool,
    ) -> Result<Option<Configuration>> {
        Workflow::new(self.inputs.target.id(), strategy, self.reconciler.clone(), self.load.clone())
            .phase(phase)
            .logger(self.logger.clone())
            .teardown_between_steps(teardown_between_steps)
            .teardown_at_end(true)
            .run(plan)
            .await
            .with_context(|| format!("Sizing phase {} failed", phase))
    }

    fn type_finding(&self, found: &Configuration) -> Result<TypeFinding> {
        let instance_type = found.require(params::INSTANCE_TYPE)?.to_string();
        let count: u32 = found.parse(params::INITIAL_INSTANCE_COUNT)?;
        let tps: f64 = found.parse(params::STEADY_STATE_TPS)?;
        let peak = self.inputs.peak_tps;

        let tps_per_instance = tps / count as f64;
        let needed = (peak / tps_per_instance).ceil() as u32;

        Ok(TypeFinding {
            explanation: format!(
                "Last green run was {tps} TPS supported by {count} instances of {instance_type}.\n\
                 {tps} / {count} = {tps_per_instance} TPS per instance.\n\
                 To support {peak} TPS, we need ceiling({peak} / {tps_per_instance}) = {needed} instances."
            ),
            instance_type,
            initial_instance_count: count,
            steady_state_tps: tps,
            tps_per_instance,
            instance_count_needed: needed,
        })
    }

    fn max_count_finding(&self, instance_type: &str, found: &Configuration) -> Result<MaxCountFinding> {
        let count: u32 = found.parse(params::INITIAL_INSTANCE_COUNT)?;
        let tps: f64 = found.parse(params::STEADY_STATE_TPS)?;
        let max_tps_per_instance = tps / count as f64;
        let invocations_target = (self.inputs.peak_tps / count as f64 * 60.0 * SAFETY_FACTOR).floor() as u64;

        Ok(MaxCountFinding {
            max_instance_count: count,
            max_steady_state_tps: tps,
            max_tps_per_instance,
            invocations_target,
            max_cost: self.cost.explain(instance_type, count),
            explanation: format!(
                "Last green run was {tps} TPS supported by {count} instances of {instance_type}.\n\
                 max_tps_per_instance = {tps} / {count} = {max_tps_per_instance} TPS per instance.\n\
                 Autoscaling metric ({metric}):\n\
                 = int(max_tps_per_instance * 60 seconds/minute * safety_factor)\n\
                 = int({max_tps_per_instance} * 60 * {SAFETY_FACTOR})\n\
                 = {invocations_target} invocations / instance / minute",
                metric = INVOCATIONS_PER_INSTANCE,
            ),
        })
    }

    fn min_count_finding(&self, instance_type: &str, max_instance_count: u32, found: &Configuration) -> Result<MinCountFinding> {
        let min: u32 = found.parse(params::SCALING_MIN_INSTANCE_COUNT)?;
        let inputs = &self.inputs;

        Ok(MinCountFinding {
            min_instance_count: min,
            min_cost: self.cost.explain(instance_type, min),
            explanation: format!(
                "Traffic was {} TPS ramped over {} minutes to {} TPS, and then run for {} minutes.\n\
                 Last green run was autoscaling with minimum {}, maximum {} instances of type {},\n\
                 with scaling metric {} at {}.",
                inputs.endurance_ramp_start_tps,
                inputs.endurance_ramp_minutes,
                inputs.peak_tps,
                inputs.endurance_steady_state_minutes,
                min,
                max_instance_count,
                instance_type,
                found.get(params::SCALING_METRIC).unwrap_or(INVOCATIONS_PER_INSTANCE),
                found.get(params::SCALING_TARGET).unwrap_or("unknown"),
            ),
        })
    }
}
