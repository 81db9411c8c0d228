//! Step driver
//!
//! Runs one search to completion: ask the strategy for a configuration,
//! converge the environment to it, generate load, evaluate the results and
//! record the run on the plan. Any reconciler or load error aborts the
//! search.

use crate::environment::{DesiredState, EndpointId, Reconciler};
use crate::evaluate::evaluate;
use crate::load::LoadGenerator;
use crate::models::{Configuration, Plan, Run};
use crate::observability::{SizerMetrics, StructuredLogger};
use crate::step::StepStrategy;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

/// One search against one endpoint
pub struct Workflow {
    phase: String,
    endpoint: EndpointId,
    strategy: Box<dyn StepStrategy>,
    reconciler: Reconciler,
    load: Arc<dyn LoadGenerator>,
    teardown_between_steps: bool,
    teardown_at_end: bool,
    logger: StructuredLogger,
    metrics: SizerMetrics,
}

impl Workflow {
    pub fn new(
        endpoint: EndpointId,
        strategy: Box<dyn StepStrategy>,
        reconciler: Reconciler,
        load: Arc<dyn LoadGenerator>,
    ) -> Self {
        Self {
            phase: "search".to_string(),
            endpoint,
            strategy,
            reconciler,
            load,
            teardown_between_steps: false,
            teardown_at_end: true,
            logger: StructuredLogger::new("adhoc"),
            metrics: SizerMetrics::new(),
        }
    }

    /// Label used in logs for this search
    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    /// Start every step from a clean environment
    pub fn teardown_between_steps(mut self, enabled: bool) -> Self {
        self.teardown_between_steps = enabled;
        self
    }

    pub fn teardown_at_end(mut self, enabled: bool) -> Self {
        self.teardown_at_end = enabled;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Drive the strategy until it is done and return the recommendation
    pub async fn run(&mut self, plan: &mut Plan) -> Result<Option<Configuration>> {
        let search_space = plan
            .dimensions()
            .iter()
            .map(|d| d.values.len())
            .product::<usize>();
        self.logger
            .log_phase_started(&self.phase, self.strategy.name(), search_space);

        let mut step = 0;
        while let Some(configuration) = self.strategy.next(plan) {
            step += 1;
            let started = Instant::now();
            let passed = self.step(plan, &configuration).await?;
            let elapsed = started.elapsed().as_secs_f64();

            self.metrics.inc_runs(passed);
            self.metrics.observe_step_duration(elapsed);
            self.logger
                .log_step(&self.phase, step, &configuration.to_string(), passed, elapsed);
        }

        if self.teardown_at_end {
            self.reconciler
                .teardown(&self.endpoint)
                .await
                .context("Failed to tear down environment after search")?;
        }

        let recommendation = plan.recommendation().cloned();
        let rendered = recommendation.as_ref().map(|c| c.to_string());
        self.logger
            .log_recommendation(&self.phase, rendered.as_deref());
        info!(
            phase = %self.phase,
            steps = step,
            total_runs = plan.total_runs(),
            "Search finished"
        );
        Ok(recommendation)
    }

    async fn step(&self, plan: &mut Plan, configuration: &Configuration) -> Result<bool> {
        if self.teardown_between_steps {
            self.reconciler
                .teardown(&self.endpoint)
                .await
                .context("Failed to tear down environment between steps")?;
        }

        let desired = DesiredState::from_configuration(configuration)
            .with_context(|| format!("Invalid configuration {}", configuration))?;
        let outcome = self
            .reconciler
            .converge(&self.endpoint, &desired)
            .await
            .with_context(|| format!("Failed to prepare environment for {}", configuration))?;

        let report = self
            .load
            .run(configuration)
            .await
            .with_context(|| format!("Load test failed for {}", configuration))?;

        let run = Run {
            id: report.run_id,
            started_at: report.started_at,
            finished_at: report.finished_at,
            results: evaluate(&report.measurements, plan.requirements()),
        };
        let passed = run.is_success();

        info!(
            phase = %self.phase,
            configuration = %configuration,
            environment = outcome.as_str(),
            run_id = %run.id,
            passed = passed,
            "Recorded run"
        );
        plan.record_run(run)?;
        Ok(passed)
    }
}
