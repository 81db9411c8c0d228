//! `perfsize cost`: hosting cost for a fleet

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::commands::run::cost_estimator;
use crate::config::SizerConfig;
use crate::output::{print_warning, OutputFormat};

#[derive(Debug, Serialize)]
struct CostSummary<'a> {
    instance_type: &'a str,
    instance_count: u32,
    hourly: Option<f64>,
    explanation: String,
}

pub fn explain_cost(
    config: &SizerConfig,
    cost_file: Option<&Path>,
    instance_type: &str,
    instance_count: u32,
    format: OutputFormat,
) -> Result<()> {
    let estimator = cost_estimator(cost_file, config)?;
    let explanation = estimator.explain(instance_type, instance_count);

    match format {
        OutputFormat::Json => {
            let summary = CostSummary {
                instance_type,
                instance_count,
                hourly: estimator.hourly(instance_type, instance_count),
                explanation,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Table => {
            if estimator.rate(instance_type).is_none() {
                print_warning(&explanation);
            } else {
                print!("{}", explanation);
            }
        }
    }
    Ok(())
}
