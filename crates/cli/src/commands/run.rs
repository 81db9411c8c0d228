//! `perfsize run`: the full sizing campaign

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use perfsize_lib::campaign::{MaxCountFinding, MinCountFinding, ScenarioRequest, TypeFinding};
use perfsize_lib::{
    params, render_metrics, Campaign, CampaignInputs, CampaignReport, Configuration, CostEstimator,
    EndpointTarget, InMemoryControlPlane, LoadGenerator, Plan, Reconciler, SimulatedLoadGenerator,
    WaitConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::SizerConfig;
use crate::output::{
    history_rows, print_grid, print_heading, print_info, print_success, print_table, print_warning,
    OutputFormat,
};

const DEFAULT_COST_FILE: &str = "resources/configs/cost/us-west-2.json";

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Runtime host receiving inference traffic
    #[arg(long)]
    pub host: String,

    /// Region for the control plane and cost lookup
    #[arg(long, env = "PERFSIZE_REGION")]
    pub region: String,

    #[arg(long)]
    pub endpoint_name: String,

    #[arg(long)]
    pub endpoint_config_name: String,

    #[arg(long, default_value = "variant-name-1")]
    pub variant_name: String,

    #[arg(long)]
    pub model_name: String,

    /// Request mix as JSON, e.g. '[{"path": "payload.json", "weight": 100}]'
    #[arg(long)]
    pub scenario_requests: String,

    /// Required highest throughput (TPS)
    #[arg(long)]
    pub peak_tps: f64,

    /// Allowed p99 latency of successful requests (ms)
    #[arg(long)]
    pub latency_success_p99: f64,

    /// Allowed failure percentage
    #[arg(long)]
    pub percent_fail: f64,

    /// Comma separated instance types to test
    #[arg(long, value_delimiter = ',', required = true)]
    pub type_walk: Vec<String>,

    /// Comma separated instance counts to test
    #[arg(long, value_delimiter = ',', required = true)]
    pub count_walk: Vec<u32>,

    /// Comma separated throughputs to test
    #[arg(long, value_delimiter = ',', required = true)]
    pub tps_walk: Vec<f64>,

    /// Minutes per instance type test
    #[arg(long, default_value_t = 3.0)]
    pub duration_minutes: f64,

    #[arg(long, default_value_t = 0.0)]
    pub endurance_ramp_start_tps: f64,

    #[arg(long, default_value_t = 0.0)]
    pub endurance_ramp_minutes: f64,

    #[arg(long, default_value_t = 30.0)]
    pub endurance_steady_state_minutes: f64,

    /// Extra instance counts tried above the extrapolated need
    #[arg(long, default_value_t = 3)]
    pub endurance_retries: u32,

    /// Directory for job results (overrides config)
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// JSON map of instance type to hourly rate (overrides config)
    #[arg(long)]
    pub cost_file: Option<PathBuf>,

    /// Use an in-memory control plane and synthetic load
    #[arg(long)]
    pub simulate: bool,

    /// Throughput one simulated instance sustains
    #[arg(long, default_value_t = 150.0, requires = "simulate")]
    pub simulate_capacity_tps: f64,
}

impl RunArgs {
    pub fn inputs(&self) -> Result<CampaignInputs> {
        let scenario_requests: Vec<ScenarioRequest> = serde_json::from_str(&self.scenario_requests)
            .context("--scenario-requests must be a JSON list of {\"path\", \"weight\"} objects")?;
        Ok(CampaignInputs {
            target: EndpointTarget {
                host: self.host.clone(),
                region: self.region.clone(),
                endpoint_name: self.endpoint_name.clone(),
                endpoint_config_name: self.endpoint_config_name.clone(),
                variant_name: self.variant_name.clone(),
                model_name: self.model_name.clone(),
            },
            scenario_requests,
            peak_tps: self.peak_tps,
            latency_success_p99: self.latency_success_p99,
            percent_fail: self.percent_fail,
            type_walk: self.type_walk.clone(),
            count_walk: self.count_walk.clone(),
            tps_walk: self.tps_walk.clone(),
            duration_minutes: self.duration_minutes,
            endurance_ramp_start_tps: self.endurance_ramp_start_tps,
            endurance_ramp_minutes: self.endurance_ramp_minutes,
            endurance_steady_state_minutes: self.endurance_steady_state_minutes,
            endurance_retries: self.endurance_retries,
        })
    }
}

/// Resolve the cost table; only an explicitly requested file must exist
pub fn cost_estimator(explicit: Option<&Path>, config: &SizerConfig) -> Result<CostEstimator> {
    if let Some(path) = explicit.or(config.cost_file.as_deref()) {
        return CostEstimator::from_file(path);
    }
    let fallback = Path::new(DEFAULT_COST_FILE);
    if fallback.exists() {
        CostEstimator::from_file(fallback)
    } else {
        warn!(path = DEFAULT_COST_FILE, "Cost file not found, cost estimates unavailable");
        Ok(CostEstimator::default())
    }
}

/// Passes when the fleet covers the throughput; an autoscaled floor only
/// needs to cover half of it before scale-out catches up.
fn simulated_capacity(capacity_tps: f64) -> impl Fn(&Configuration) -> bool + Send + Sync + 'static {
    move |configuration| {
        let tps: f64 = configuration.parse(params::STEADY_STATE_TPS).unwrap_or(f64::MAX);
        if configuration.get(params::SCALING_ENABLED) == Some("true") {
            let floor: f64 = configuration.parse(params::SCALING_MIN_INSTANCE_COUNT).unwrap_or(0.0);
            floor * capacity_tps >= tps / 2.0
        } else {
            let count: f64 = configuration.parse(params::INITIAL_INSTANCE_COUNT).unwrap_or(0.0);
            count * capacity_tps >= tps
        }
    }
}

fn simulated(capacity_tps: f64) -> (Reconciler, Arc<dyn LoadGenerator>) {
    let wait = WaitConfig::new(Duration::from_millis(10), 100);
    let reconciler = Reconciler::new(Arc::new(InMemoryControlPlane::new()))
        .with_in_service_wait(wait.clone())
        .with_deleted_wait(wait);
    let load: Arc<dyn LoadGenerator> = Arc::new(SimulatedLoadGenerator::new(simulated_capacity(capacity_tps)));
    (reconciler, load)
}

pub async fn run_campaign(args: RunArgs, config: &SizerConfig, format: OutputFormat) -> Result<()> {
    let (reconciler, load): (Reconciler, Arc<dyn LoadGenerator>) = if args.simulate {
        print_warning("Simulation mode: no endpoints are created and no traffic is sent");
        simulated(args.simulate_capacity_tps)
    } else {
        let load: Arc<dyn LoadGenerator> = Arc::new(config.load_generator()?);
        (config.reconciler(&args.region)?, load)
    };

    let cost = cost_estimator(args.cost_file.as_deref(), config)?;
    let campaign = Campaign::new(args.inputs()?, reconciler, load, cost)?;
    let results_dir = args
        .results_dir
        .clone()
        .unwrap_or_else(|| config.results_dir.clone())
        .join(campaign.job_id());
    let campaign = campaign.save_to(&results_dir);

    print_info(&format!("Starting job {}", campaign.job_id()));
    let result = campaign.run().await;

    std::fs::create_dir_all(&results_dir)
        .with_context(|| format!("Failed to create results directory: {}", results_dir.display()))?;
    let metrics_path = results_dir.join("metrics.prom");
    std::fs::write(&metrics_path, render_metrics()?)
        .with_context(|| format!("Failed to write metrics: {}", metrics_path.display()))?;
    let report_path = results_dir.join("report.json");
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if report_path.exists() {
                print_warning(&format!("Partial report saved to {}", report_path.display()));
            }
            return Err(e);
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_report(&report, format),
    }

    print_success(&format!("Report saved to {}", report_path.display()));
    Ok(())
}

fn print_report(report: &CampaignReport, format: OutputFormat) {
    print_phase("Instance type", report.type_plan.as_ref(), format);
    if let Some(found) = &report.type_finding {
        print_type_finding(found);
    }

    print_phase("Maximum instance count", report.max_count_plan.as_ref(), format);
    if let Some(found) = &report.max_count_finding {
        print_max_finding(found);
    }

    print_phase("Minimum instance count", report.min_count_plan.as_ref(), format);
    if let Some(found) = &report.min_count_finding {
        print_min_finding(found);
    }

    println!(
        "Total runs: {}   Duration: {}s",
        report.total_runs(),
        (report.finished_at - report.started_at).num_seconds()
    );
    if report.is_complete() {
        print_success("Sizing complete");
    } else {
        print_warning("Sizing incomplete: a phase found no working configuration");
    }
}

fn print_phase(title: &str, plan: Option<&Plan>, format: OutputFormat) {
    print_heading(title);
    match plan {
        Some(plan) => {
            if matches!(format, OutputFormat::Table) {
                print_grid(plan);
            }
            print_table(&history_rows(plan), format);
        }
        None => println!("{}", "skipped".dimmed()),
    }
    println!();
}

fn print_type_finding(found: &TypeFinding) {
    println!(
        "{} {} x {} at {} TPS",
        "Working type:".bold(),
        found.initial_instance_count,
        found.instance_type.cyan(),
        found.steady_state_tps
    );
    println!("{}\n", found.explanation);
}

fn print_max_finding(found: &MaxCountFinding) {
    println!("{} {}", "Maximum instance count:".bold(), found.max_instance_count.to_string().cyan());
    println!("{}", found.explanation);
    println!("{}\n", found.max_cost);
}

fn print_min_finding(found: &MinCountFinding) {
    println!("{} {}", "Minimum instance count:".bold(), found.min_instance_count.to_string().cyan());
    println!("{}", found.explanation);
    println!("{}\n", found.min_cost);
}
