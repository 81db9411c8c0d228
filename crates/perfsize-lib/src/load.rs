//! Load generation
//!
//! The load generator replays traffic against the live endpoint for one
//! configuration and reports aggregate metrics. Generators are external to
//! the sizing search; this module only defines the seam plus a
//! subprocess-backed and a simulated implementation.

use crate::models::{params, Configuration};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Metric names reported by load generators
pub mod metrics {
    pub const LATENCY_SUCCESS_P50: &str = "latency_success_p50";
    pub const LATENCY_SUCCESS_P95: &str = "latency_success_p95";
    pub const LATENCY_SUCCESS_P99: &str = "latency_success_p99";
    pub const SUCCESS_COUNT: &str = "success_count";
    pub const FAILURE_COUNT: &str = "failure_count";
    pub const PERCENT_FAIL: &str = "percent_fail";
}

/// One aggregate metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub metric: String,
    pub value: f64,
}

impl Measurement {
    pub fn new(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
        }
    }
}

/// Output of a single load test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub measurements: Vec<Measurement>,
}

/// Trait for load generator implementations
#[async_trait]
pub trait LoadGenerator: Send + Sync {
    /// Run a load test shaped by the configuration's traffic parameters
    async fn run(&self, configuration: &Configuration) -> Result<LoadReport>;
}

/// Runs an external command that prints a JSON [`LoadReport`] on stdout
///
/// Every configuration parameter is exported as `PERFSIZE_<NAME>` in the
/// child environment, e.g. `PERFSIZE_STEADY_STATE_TPS=100`.
#[derive(Debug, Clone)]
pub struct CommandLoadGenerator {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandLoadGenerator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Environment variable name for a configuration parameter
    pub fn env_name(parameter: &str) -> String {
        format!("PERFSIZE_{}", parameter.to_uppercase())
    }
}

#[async_trait]
impl LoadGenerator for CommandLoadGenerator {
    async fn run(&self, configuration: &Configuration) -> Result<LoadReport> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        for (name, value) in configuration.parameters() {
            command.env(Self::env_name(name), value);
        }

        debug!(
            program = %self.program,
            steady_state_tps = ?configuration.get(params::STEADY_STATE_TPS),
            "Starting load generator"
        );

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .with_context(|| format!("Load generator {} timed out", self.program))?,
            None => command.output().await,
        }
        .with_context(|| format!("Failed to start load generator {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Load generator {} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Failed to parse report from load generator {}", self.program))
    }
}

type Oracle = Box<dyn Fn(&Configuration) -> bool + Send + Sync>;

/// Produces passing or failing measurements from an oracle, without traffic
pub struct SimulatedLoadGenerator {
    oracle: Oracle,
    counter: AtomicU64,
}

impl SimulatedLoadGenerator {
    pub fn new<F>(oracle: F) -> Self
    where
        F: Fn(&Configuration) -> bool + Send + Sync + 'static,
    {
        Self {
            oracle: Box::new(oracle),
            counter: AtomicU64::new(0),
        }
    }

    /// Generator that passes every configuration
    pub fn always_pass() -> Self {
        Self::new(|_| true)
    }

    /// Number of runs performed so far
    pub fn runs(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoadGenerator for SimulatedLoadGenerator {
    async fn run(&self, configuration: &Configuration) -> Result<LoadReport> {
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let pass = (self.oracle)(configuration);
        let started_at = Utc::now();

        let (p99, percent_fail) = if pass { (42.0, 0.0) } else { (5000.0, 12.5) };

        Ok(LoadReport {
            run_id: format!("sim-{:04}", sequence),
            started_at,
            finished_at: Utc::now(),
            measurements: vec![
                Measurement::new(metrics::LATENCY_SUCCESS_P99, p99),
                Measurement::new(metrics::PERCENT_FAIL, percent_fail),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_name() {
        assert_eq!(
            CommandLoadGenerator::env_name(params::STEADY_STATE_TPS),
            "PERFSIZE_STEADY_STATE_TPS"
        );
    }

    #[tokio::test]
    async fn test_simulated_generator_follows_oracle() {
        let generator =
            SimulatedLoadGenerator::new(|c| c.get(params::INSTANCE_TYPE) == Some("large"));

        let small: Configuration = [(params::INSTANCE_TYPE, "small")].into_iter().collect();
        let large = small.with(params::INSTANCE_TYPE, "large");

        let failing = generator.run(&small).await.unwrap();
        let passing = generator.run(&large).await.unwrap();

        assert_eq!(failing.run_id, "sim-0001");
        assert_eq!(passing.run_id, "sim-0002");
        assert_eq!(failing.measurements[0].value, 5000.0);
        assert_eq!(passing.measurements[0].value, 42.0);
        assert_eq!(generator.runs(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generator_reads_env_and_parses_report() {
        let script = r#"printf '{"run_id":"cmd-%s","started_at":"2024-01-01T00:00:00Z","finished_at":"2024-01-01T00:03:00Z","measurements":[{"metric":"latency_success_p99","value":12.5}]}' "$PERFSIZE_STEADY_STATE_TPS""#;
        let generator = CommandLoadGenerator::new("sh").args(["-c", script]);
        let config: Configuration = [(params::STEADY_STATE_TPS, "100")].into_iter().collect();

        let report = generator.run(&config).await.unwrap();
        assert_eq!(report.run_id, "cmd-100");
        assert_eq!(
            report.measurements,
            vec![Measurement::new(metrics::LATENCY_SUCCESS_P99, 12.5)]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generator_failure_propagates() {
        let generator = CommandLoadGenerator::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let err = generator.run(&Configuration::default()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
