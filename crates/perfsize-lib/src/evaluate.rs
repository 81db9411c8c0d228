//! Requirement evaluation
//!
//! Judges load-generator measurements against the plan's requirements.

use crate::load::Measurement;
use crate::models::{MetricResult, Requirement};

/// Attach requirement conditions to the measurements of one run
///
/// Every requirement yields a result, with `value: None` when the metric was
/// not measured. Measurements nobody requires are kept as informational
/// results with no conditions.
pub fn evaluate(measurements: &[Measurement], requirements: &[Requirement]) -> Vec<MetricResult> {
    let mut results: Vec<MetricResult> = requirements
        .iter()
        .map(|requirement| MetricResult {
            metric: requirement.metric.clone(),
            value: measurements
                .iter()
                .find(|m| m.metric == requirement.metric)
                .map(|m| m.value),
            conditions: requirement.conditions.clone(),
        })
        .collect();

    for measurement in measurements {
        if requirements.iter().any(|r| r.metric == measurement.metric) {
            continue;
        }
        results.push(MetricResult {
            metric: measurement.metric.clone(),
            value: Some(measurement.value),
            conditions: Vec::new(),
        });
    }

    results
}
