//! End-to-end sizing campaigns against the in-memory control plane

use anyhow::Result;
use async_trait::async_trait;
use perfsize_lib::campaign::ScenarioRequest;
use perfsize_lib::{
    params, Campaign, CampaignInputs, CampaignReport, Configuration, CostEstimator, EndpointTarget,
    InMemoryControlPlane, LoadGenerator, LoadReport, Reconciler, SimulatedLoadGenerator, WaitConfig,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Throughput one instance of each type sustains
fn capacity(instance_type: &str) -> f64 {
    match instance_type {
        "ml.m5.large" => 150.0,
        "ml.m5.xlarge" => 300.0,
        _ => 0.0,
    }
}

/// Fixed fleets must carry the full load; autoscaled ones only half of it
/// before scale-out kicks in.
fn oracle(configuration: &Configuration) -> bool {
    let per_instance = capacity(configuration.get(params::INSTANCE_TYPE).unwrap_or_default());
    let tps: f64 = configuration.parse(params::STEADY_STATE_TPS).unwrap_or(f64::MAX);

    if configuration.get(params::SCALING_ENABLED) == Some("true") {
        let floor: f64 = configuration.parse(params::SCALING_MIN_INSTANCE_COUNT).unwrap_or(0.0);
        floor * per_instance >= tps / 2.0
    } else {
        let count: f64 = configuration.parse(params::INITIAL_INSTANCE_COUNT).unwrap_or(0.0);
        count * per_instance >= tps
    }
}

fn inputs(type_walk: &[&str], peak_tps: f64) -> CampaignInputs {
    CampaignInputs {
        target: EndpointTarget {
            host: "runtime.sagemaker.us-west-2.amazonaws.com".to_string(),
            region: "us-west-2".to_string(),
            endpoint_name: "LEARNING-model-sim-1".to_string(),
            endpoint_config_name: "LEARNING-model-sim-1-0".to_string(),
            variant_name: "variant-name-1".to_string(),
            model_name: "model-sim-public".to_string(),
        },
        scenario_requests: vec![ScenarioRequest {
            path: Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/payloads/generic.json"),
            weight: 100.0,
        }],
        peak_tps,
        latency_success_p99: 200.0,
        percent_fail: 0.01,
        type_walk: type_walk.iter().map(|t| t.to_string()).collect(),
        count_walk: vec![1],
        tps_walk: vec![100.0, 200.0, 300.0, 400.0],
        duration_minutes: 3.0,
        endurance_ramp_start_tps: 0.0,
        endurance_ramp_minutes: 0.0,
        endurance_steady_state_minutes: 30.0,
        endurance_retries: 2,
    }
}

fn costs() -> CostEstimator {
    CostEstimator::new(BTreeMap::from([
        ("ml.m5.large".to_string(), 0.115),
        ("ml.m5.xlarge".to_string(), 0.23),
    ]))
}

fn reconciler(plane: &Arc<InMemoryControlPlane>) -> Reconciler {
    Reconciler::new(plane.clone())
        .with_in_service_wait(WaitConfig::new(Duration::from_secs(30), 10))
        .with_deleted_wait(WaitConfig::new(Duration::from_secs(30), 10))
}

#[tokio::test(start_paused = true)]
async fn test_full_campaign_finds_type_max_and_min() {
    let plane = Arc::new(InMemoryControlPlane::new());
    let load = Arc::new(SimulatedLoadGenerator::new(oracle));
    let campaign = Campaign::new(
        inputs(&["ml.m5.large", "ml.m5.xlarge"], 500.0),
        reconciler(&plane),
        load.clone(),
        costs(),
    )
    .unwrap();

    let report = campaign.run().await.unwrap();
    assert!(report.is_complete());

    // large at 100 TPS passes, 200 fails: 100 TPS per instance, 5 needed.
    let found = report.type_finding.as_ref().unwrap();
    assert_eq!(found.instance_type, "ml.m5.large");
    assert_eq!(found.steady_state_tps, 100.0);
    assert_eq!(found.tps_per_instance, 100.0);
    assert_eq!(found.instance_count_needed, 5);
    assert_eq!(report.type_plan.as_ref().unwrap().total_runs(), 2);

    // 5 instances of large carry 750 TPS.
    let max = report.max_count_finding.as_ref().unwrap();
    assert_eq!(max.max_instance_count, 5);
    assert_eq!(max.invocations_target, 3000);
    assert!(max.max_cost.starts_with("5 instances of ml.m5.large"));
    assert_eq!(report.max_count_plan.as_ref().unwrap().total_runs(), 1);

    // Floors: 2 passes, 1 fails.
    let min = report.min_count_finding.as_ref().unwrap();
    assert_eq!(min.min_instance_count, 2);
    let floors: Vec<&str> = report
        .min_count_plan
        .as_ref()
        .unwrap()
        .history()
        .iter()
        .filter_map(|entry| entry.configuration.get(params::SCALING_MIN_INSTANCE_COUNT))
        .collect();
    assert_eq!(floors, vec!["2", "1"]);

    assert_eq!(report.total_runs(), 5);
    assert_eq!(load.runs(), 5);

    // Every phase tears down at the end.
    assert_eq!(plane.endpoint_count(), 0);
    assert!(!plane.has_endpoint_config("LEARNING-model-sim-1-0"));
}

#[tokio::test(start_paused = true)]
async fn test_campaign_skips_autoscaling_when_one_instance_suffices() {
    let plane = Arc::new(InMemoryControlPlane::new());
    let load = Arc::new(SimulatedLoadGenerator::new(oracle));
    let campaign = Campaign::new(
        inputs(&["ml.m5.xlarge"], 250.0),
        reconciler(&plane),
        load,
        costs(),
    )
    .unwrap();

    let report = campaign.run().await.unwrap();

    let found = report.type_finding.as_ref().unwrap();
    assert_eq!(found.steady_state_tps, 300.0);
    assert_eq!(found.instance_count_needed, 1);
    assert_eq!(report.max_count_finding.as_ref().unwrap().max_instance_count, 1);
    assert!(report.min_count_plan.is_none());
    assert!(report.min_count_finding.is_none());
    assert!(report.is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_campaign_without_working_type_stops_after_first_phase() {
    let plane = Arc::new(InMemoryControlPlane::new());
    let load = Arc::new(SimulatedLoadGenerator::new(|_| false));
    let campaign = Campaign::new(
        inputs(&["ml.m5.large", "ml.m5.xlarge"], 500.0),
        reconciler(&plane),
        load,
        costs(),
    )
    .unwrap();

    let report = campaign.run().await.unwrap();

    assert!(report.type_finding.is_none());
    assert!(report.max_count_plan.is_none());
    assert!(!report.is_complete());
    // Two types by one count, all at the lowest throughput.
    assert_eq!(report.type_plan.as_ref().unwrap().total_runs(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_environment_timeout_aborts_campaign() {
    let plane = Arc::new(InMemoryControlPlane::new());
    plane.set_stuck("LEARNING-model-sim-1", true);
    let load = Arc::new(SimulatedLoadGenerator::always_pass());
    let campaign = Campaign::new(
        inputs(&["ml.m5.large"], 500.0),
        reconciler(&plane),
        load.clone(),
        costs(),
    )
    .unwrap();

    let err = campaign.run().await.unwrap_err();
    let chain = format!("{:#}", err);
    assert!(chain.contains("Sizing phase type failed"), "{chain}");
    assert!(chain.contains("timed out waiting"), "{chain}");
    assert_eq!(load.runs(), 0);
}

#[test]
fn test_invalid_inputs_are_rejected() {
    let plane = Arc::new(InMemoryControlPlane::new());
    let mut bad = inputs(&["ml.m5.large"], 500.0);
    bad.peak_tps = 0.0;

    let result = Campaign::new(
        bad,
        reconciler(&plane),
        Arc::new(SimulatedLoadGenerator::always_pass()),
        costs(),
    );
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_report_is_saved_as_json() {
    let plane = Arc::new(InMemoryControlPlane::new());
    let campaign = Campaign::new(
        inputs(&["ml.m5.xlarge"], 250.0),
        reconciler(&plane),
        Arc::new(SimulatedLoadGenerator::new(oracle)),
        costs(),
    )
    .unwrap();
    let report = campaign.run().await.unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let path = report.save(&dir.path().join(&report.job_id)).unwrap();

    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(saved["type_finding"]["instance_type"], "ml.m5.xlarge");
    assert!(saved["job_id"].as_str().unwrap().ends_with("-model-sim-public"));
}

#[test]
fn test_request_mix_is_fixed_in_every_phase_plan() {
    let plane = Arc::new(InMemoryControlPlane::new());
    let inputs = inputs(&["ml.m5.large"], 500.0);
    let expected = serde_json::to_string(&inputs.scenario_requests).unwrap();
    let campaign = Campaign::new(
        inputs,
        reconciler(&plane),
        Arc::new(SimulatedLoadGenerator::always_pass()),
        costs(),
    )
    .unwrap();

    let plans = [
        campaign.type_plan().unwrap(),
        campaign.max_count_plan("ml.m5.large", 4).unwrap(),
        campaign.min_count_plan("ml.m5.large", 4, 1875).unwrap(),
    ];
    for plan in &plans {
        let base = plan.base_configuration();
        assert_eq!(base.get(params::SCENARIO_REQUESTS), Some(expected.as_str()));
    }
    let mix: Vec<ScenarioRequest> = serde_json::from_str(&expected).unwrap();
    assert_eq!(mix[0].weight, 100.0);
}

#[test]
fn test_missing_payload_file_is_rejected() {
    let plane = Arc::new(InMemoryControlPlane::new());
    let mut bad = inputs(&["ml.m5.large"], 500.0);
    bad.scenario_requests[0].path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/payloads/missing.json");

    let result = Campaign::new(
        bad,
        reconciler(&plane),
        Arc::new(SimulatedLoadGenerator::always_pass()),
        costs(),
    );
    let err = format!("{:#}", result.err().unwrap());
    assert!(err.contains("missing.json"), "{err}");
}

/// Delegates to the oracle for a number of runs, then fails every run
struct FailingAfter {
    inner: SimulatedLoadGenerator,
    remaining: AtomicU64,
}

#[async_trait]
impl LoadGenerator for FailingAfter {
    async fn run(&self, configuration: &Configuration) -> Result<LoadReport> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            anyhow::bail!("load generator crashed");
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        self.inner.run(configuration).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_phase_keeps_earlier_findings_on_disk() {
    let plane = Arc::new(InMemoryControlPlane::new());
    // Two runs settle the type phase: 100 TPS passes, 200 fails.
    let load = Arc::new(FailingAfter {
        inner: SimulatedLoadGenerator::new(oracle),
        remaining: AtomicU64::new(2),
    });
    let dir = tempfile::TempDir::new().unwrap();
    let campaign = Campaign::new(inputs(&["ml.m5.large"], 500.0), reconciler(&plane), load, costs())
        .unwrap()
        .save_to(dir.path());

    let err = campaign.run().await.unwrap_err();
    let chain = format!("{:#}", err);
    assert!(chain.contains("Sizing phase max_count failed"), "{chain}");

    let saved: CampaignReport =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("report.json")).unwrap()).unwrap();
    let type_finding = saved.type_finding.as_ref().expect("type phase finished before the failure");
    assert_eq!(type_finding.instance_type, "ml.m5.large");
    assert_eq!(type_finding.instance_count_needed, 5);
    assert!(saved.type_plan.is_some());
    assert!(saved.max_count_finding.is_none());
    assert!(saved.error.as_deref().unwrap().contains("load generator crashed"));
    assert!(!saved.is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_successful_campaign_saves_report_without_error() {
    let plane = Arc::new(InMemoryControlPlane::new());
    let dir = tempfile::TempDir::new().unwrap();
    let campaign = Campaign::new(
        inputs(&["ml.m5.xlarge"], 250.0),
        reconciler(&plane),
        Arc::new(SimulatedLoadGenerator::new(oracle)),
        costs(),
    )
    .unwrap()
    .save_to(dir.path());

    let report = campaign.run().await.unwrap();
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("report.json")).unwrap()).unwrap();
    assert!(saved.get("error").is_none());
    assert_eq!(saved["job_id"], report.job_id.as_str());
}
