//! CLI integration tests

use std::process::{Command, Output};

fn perfsize(args: &[&str]) -> Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "perfsize-cli", "--"])
        .args(args)
        .env_remove("PERFSIZE_REGION")
        .env_remove("PERFSIZE_CONTROL_PLANE_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = perfsize(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Capacity sizing"), "Should show about text");
    assert!(stdout.contains("run"), "Should show run command");
    assert!(stdout.contains("observe"), "Should show observe command");
    assert!(stdout.contains("teardown"), "Should show teardown command");
    assert!(stdout.contains("cost"), "Should show cost command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = perfsize(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("perfsize"), "Should show binary name");
}

/// Test run subcommand help
#[test]
fn test_run_help() {
    let output = perfsize(&["run", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Run help should succeed");
    for flag in [
        "--endpoint-name",
        "--endpoint-config-name",
        "--peak-tps",
        "--scenario-requests",
        "--type-walk",
        "--count-walk",
        "--tps-walk",
        "--endurance-retries",
        "--simulate",
    ] {
        assert!(stdout.contains(flag), "Should show {flag} option");
    }
    assert!(stdout.contains("variant-name-1"), "Should show variant default");
}

/// Test teardown subcommand help
#[test]
fn test_teardown_help() {
    let output = perfsize(&["teardown", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Teardown help should succeed");
    assert!(stdout.contains("--endpoint-name"));
    assert!(stdout.contains("--endpoint-config-name"));
    assert!(stdout.contains("PERFSIZE_REGION"), "Should show env var");
}

/// Test format option
#[test]
fn test_format_option() {
    let output = perfsize(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
    assert!(stdout.contains("--log-format"), "Should show log format option");
}

/// Test cost explanation from a rate file
#[test]
fn test_cost_command() {
    let dir = tempfile::TempDir::new().unwrap();
    let rates = dir.path().join("rates.json");
    std::fs::write(&rates, r#"{"ml.m5.large": 0.115}"#).unwrap();

    let output = perfsize(&[
        "cost",
        "--instance-type",
        "ml.m5.large",
        "--instance-count",
        "2",
        "--cost-file",
        rates.to_str().unwrap(),
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Cost should succeed");
    assert!(stdout.contains("2 instances of ml.m5.large"));
    assert!(stdout.contains("$0.23/hour"));
}

/// Test a simulated campaign end to end
#[test]
fn test_simulated_run_writes_report() {
    let dir = tempfile::TempDir::new().unwrap();
    let results = dir.path().join("results");
    let payload = dir.path().join("payload.json");
    std::fs::write(&payload, r#"{"instances": [[1.0, 2.0]]}"#).unwrap();
    let scenario_requests = serde_json::json!([{"path": payload, "weight": 100}]).to_string();

    let output = perfsize(&[
        "run",
        "--simulate",
        "--simulate-capacity-tps",
        "150",
        "--host",
        "runtime.example.internal",
        "--region",
        "us-west-2",
        "--endpoint-name",
        "sim-endpoint",
        "--endpoint-config-name",
        "sim-endpoint-config",
        "--model-name",
        "sim-model",
        "--scenario-requests",
        scenario_requests.as_str(),
        "--peak-tps",
        "500",
        "--latency-success-p99",
        "200",
        "--percent-fail",
        "0.01",
        "--type-walk",
        "ml.m5.large",
        "--count-walk",
        "1",
        "--tps-walk",
        "100,200",
        "--results-dir",
        results.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "Simulated run should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let job_dir = std::fs::read_dir(&results)
        .unwrap()
        .next()
        .expect("job directory")
        .unwrap()
        .path();
    assert!(job_dir.join("metrics.prom").exists());

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(job_dir.join("report.json")).unwrap()).unwrap();
    assert_eq!(report["type_finding"]["instance_count_needed"], 5);
    assert_eq!(report["max_count_finding"]["max_instance_count"], 5);
    assert_eq!(report["min_count_finding"]["min_instance_count"], 2);
    assert_eq!(report["inputs"]["scenario_requests"][0]["weight"], 100.0);
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = perfsize(&["invalid-command"]);
    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// Test missing required argument error handling
#[test]
fn test_missing_argument() {
    let output = perfsize(&["teardown", "--region", "us-west-2"]);
    assert!(!output.status.success(), "Missing argument should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "Should show error about missing argument"
    );
}

/// Test that live commands need a control plane
#[test]
fn test_observe_without_control_plane() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "wait_delay_secs = 1\n").unwrap();

    let output = perfsize(&[
        "--config",
        config.to_str().unwrap(),
        "observe",
        "--region",
        "us-west-2",
        "--endpoint-name",
        "ep",
    ]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("control_plane_url is not configured"));
}
