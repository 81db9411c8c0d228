//! Observability for sizing jobs
//!
//! Provides:
//! - Prometheus metrics (run outcomes, step duration, reconciliations, remote writes)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for step durations (in seconds)
const STEP_DURATION_BUCKETS: &[f64] = &[
    0.1, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0,
];

static GLOBAL_METRICS: OnceLock<SizerMetricsInner> = OnceLock::new();

struct SizerMetricsInner {
    runs: IntCounterVec,
    step_duration_seconds: Histogram,
    reconciliations: IntCounterVec,
    remote_writes: IntCounterVec,
    wait_polls: IntCounter,
    teardowns: IntCounter,
}

impl SizerMetricsInner {
    fn new() -> Self {
        Self {
            runs: register_int_counter_vec!(
                "perfsize_runs_total",
                "Load test runs by verdict",
                &["outcome"]
            )
            .expect("Failed to register runs_total"),

            step_duration_seconds: register_histogram!(
                "perfsize_step_duration_seconds",
                "Wall time of one step including environment setup and load",
                STEP_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register step_duration_seconds"),

            reconciliations: register_int_counter_vec!(
                "perfsize_reconciliations_total",
                "Environment reconciliations by outcome",
                &["outcome"]
            )
            .expect("Failed to register reconciliations_total"),

            remote_writes: register_int_counter_vec!(
                "perfsize_remote_writes_total",
                "Mutating control plane calls by operation",
                &["operation"]
            )
            .expect("Failed to register remote_writes_total"),

            wait_polls: register_int_counter!(
                "perfsize_wait_polls_total",
                "Status polls issued while waiting on endpoint transitions"
            )
            .expect("Failed to register wait_polls_total"),

            teardowns: register_int_counter!(
                "perfsize_teardowns_total",
                "Completed environment teardowns"
            )
            .expect("Failed to register teardowns_total"),
        }
    }
}

/// Sizing metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct SizerMetrics {
    _private: (),
}

impl Default for SizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SizerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SizerMetricsInner {
        GLOBAL_METRICS.get_or_init(SizerMetricsInner::new)
    }

    pub fn inc_runs(&self, passed: bool) {
        let outcome = if passed { "pass" } else { "fail" };
        self.inner().runs.with_label_values(&[outcome]).inc();
    }

    pub fn observe_step_duration(&self, duration_secs: f64) {
        self.inner().step_duration_seconds.observe(duration_secs);
    }

    /// `outcome` is `unchanged` or `rebuilt`
    pub fn inc_reconciliations(&self, outcome: &str) {
        self.inner().reconciliations.with_label_values(&[outcome]).inc();
    }

    pub fn inc_remote_writes(&self, operation: &str) {
        self.inner().remote_writes.with_label_values(&[operation]).inc();
    }

    pub fn inc_wait_polls(&self) {
        self.inner().wait_polls.inc();
    }

    pub fn inc_teardowns(&self) {
        self.inner().teardowns.inc();
    }
}

/// Render every registered metric in the Prometheus text format
pub fn render_metrics() -> anyhow::Result<String> {
    SizerMetrics::new();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Structured logger for sizing job events
#[derive(Clone)]
pub struct StructuredLogger {
    job_id: String,
}

impl StructuredLogger {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn log_job_started(&self, model_name: &str, endpoint_name: &str, peak_tps: f64) {
        info!(
            event = "job_started",
            job_id = %self.job_id,
            model_name = %model_name,
            endpoint_name = %endpoint_name,
            peak_tps = peak_tps,
            "Sizing job started"
        );
    }

    pub fn log_phase_started(&self, phase: &str, strategy: &str, search_space: usize) {
        info!(
            event = "phase_started",
            job_id = %self.job_id,
            phase = %phase,
            strategy = %strategy,
            search_space = search_space,
            "Sizing phase started"
        );
    }

    pub fn log_step(&self, phase: &str, step: usize, configuration: &str, passed: bool, duration_secs: f64) {
        info!(
            event = "step_completed",
            job_id = %self.job_id,
            phase = %phase,
            step = step,
            configuration = %configuration,
            passed = passed,
            duration_secs = duration_secs,
            "Step completed"
        );
    }

    /// Log the outcome of a phase; `None` means no configuration passed
    pub fn log_recommendation(&self, phase: &str, recommendation: Option<&str>) {
        match recommendation {
            Some(configuration) => info!(
                event = "recommendation",
                job_id = %self.job_id,
                phase = %phase,
                configuration = %configuration,
                "Phase produced a recommendation"
            ),
            None => warn!(
                event = "no_recommendation",
                job_id = %self.job_id,
                phase = %phase,
                "No configuration met the requirements"
            ),
        }
    }

    pub fn log_job_finished(&self, status: &str, total_runs: usize) {
        info!(
            event = "job_finished",
            job_id = %self.job_id,
            status = %status,
            total_runs = total_runs,
            "Sizing job finished"
        );
    }

    pub fn log_job_failed(&self, error: &str) {
        warn!(
            event = "job_failed",
            job_id = %self.job_id,
            error = %error,
            "Sizing job aborted"
        );
    }
}
