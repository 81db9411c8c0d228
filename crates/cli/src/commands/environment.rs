//! Endpoint inspection and cleanup

use anyhow::Result;
use colored::Colorize;
use perfsize_lib::{EndpointId, RemoteResourceState};

use crate::config::SizerConfig;
use crate::output::{color_status, print_success, OutputFormat};

/// Show the live state of an endpoint
pub async fn observe(
    config: &SizerConfig,
    region: &str,
    endpoint_name: &str,
    format: OutputFormat,
) -> Result<()> {
    let reconciler = config.reconciler(region)?;
    let state = reconciler.observe(endpoint_name).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
        OutputFormat::Table => print_state(&state),
    }
    Ok(())
}

/// Delete an endpoint, its configuration and its autoscaling
pub async fn teardown(
    config: &SizerConfig,
    region: &str,
    endpoint: EndpointId,
    format: OutputFormat,
) -> Result<()> {
    let reconciler = config.reconciler(region)?;
    reconciler.teardown(&endpoint).await?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "endpoint_name": endpoint.endpoint_name,
                "endpoint_config_name": endpoint.endpoint_config_name,
                "status": "deleted",
            })
        ),
        OutputFormat::Table => print_success(&format!(
            "Endpoint {} and configuration {} removed",
            endpoint.endpoint_name, endpoint.endpoint_config_name
        )),
    }
    Ok(())
}

fn print_state(state: &RemoteResourceState) {
    fn show<T: ToString>(value: &Option<T>) -> String {
        value.as_ref().map(T::to_string).unwrap_or_else(|| "-".to_string())
    }

    println!("{}", "Endpoint".bold());
    println!("{}", "=".repeat(50));
    println!("Name:                   {}", state.endpoint_name.cyan());
    println!("Status:                 {}", color_status(state.status.as_str()));
    println!("Configuration:          {}", show(&state.endpoint_config_name));
    println!("Variant:                {}", show(&state.variant_name));
    println!("Model:                  {}", show(&state.model_name));
    println!("Instance type:          {}", show(&state.instance_type));
    println!("Initial count:          {}", show(&state.initial_instance_count));
    println!(
        "Current / desired:      {} / {}",
        show(&state.current_instance_count),
        show(&state.desired_instance_count)
    );
    println!();

    println!("{}", "Autoscaling".bold());
    println!("{}", "-".repeat(50));
    if !state.scaling_enabled() {
        println!("{}", "disabled".dimmed());
        return;
    }
    if let Some(target) = &state.scalable_target {
        println!(
            "Capacity:               {} .. {}",
            target.min_capacity, target.max_capacity
        );
    }
    if let Some(policy) = &state.scaling_policy {
        println!("Policy:                 {} target {}", policy.metric, policy.target_value);
    }
}
