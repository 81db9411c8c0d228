//! Hosting cost arithmetic from a table of hourly instance rates

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

const HOURS_PER_DAY: f64 = 24.0;
const DAYS_PER_MONTH: f64 = 30.0;
const DAYS_PER_YEAR: f64 = 365.0;

/// Hourly rate per instance type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostEstimator {
    rates: BTreeMap<String, f64>,
}

impl CostEstimator {
    pub fn new(rates: BTreeMap<String, f64>) -> Self {
        Self { rates }
    }

    /// Load a JSON object mapping instance type to hourly rate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cost file: {}", path.display()))?;
        let rates: BTreeMap<String, f64> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cost file: {}", path.display()))?;
        Ok(Self { rates })
    }

    pub fn rate(&self, instance_type: &str) -> Option<f64> {
        self.rates.get(instance_type).copied()
    }

    pub fn hourly(&self, instance_type: &str, instance_count: u32) -> Option<f64> {
        self.rate(instance_type).map(|rate| rate * instance_count as f64)
    }

    /// Multi-line breakdown of hourly, daily, monthly and annual cost
    pub fn explain(&self, instance_type: &str, instance_count: u32) -> String {
        let Some(single) = self.rate(instance_type) else {
            return format!("Cost lookup did not find type {}", instance_type);
        };

        let noun = if instance_count == 1 { "instance" } else { "instances" };
        let hourly = single * instance_count as f64;
        let daily = HOURS_PER_DAY * hourly;
        let monthly = DAYS_PER_MONTH * daily;
        let annual = DAYS_PER_YEAR * daily;

        format!(
            "{count} {noun} of {kind} at ${single}/hour:\n\
             hourly = {count} {noun} * {single}/hour = ${hourly}/hour\n\
             daily = 24 hours * {hourly}/hour = ${daily}/day\n\
             monthly = 30 days * {daily}/day = ${monthly}/month\n\
             annual = 365 days * {daily}/day = ${annual}/year\n",
            count = instance_count,
            noun = noun,
            kind = instance_type,
            single = money(single),
            hourly = money(hourly),
            daily = money(daily),
            monthly = money(monthly),
            annual = money(annual),
        )
    }
}

/// At least two and at most four decimals
fn money(value: f64) -> String {
    let text = format!("{:.4}", value);
    let trimmed = text.trim_end_matches('0');
    let decimals = trimmed.split('.').nth(1).map(str::len).unwrap_or(0);
    if decimals >= 2 {
        trimmed.to_string()
    } else {
        format!("{:.2}", value)
    }
}
