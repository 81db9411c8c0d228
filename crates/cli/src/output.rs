//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use perfsize_lib::load::metrics;
use perfsize_lib::{params, Plan, Run};
use serde::Serialize;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Row for a phase history table
#[derive(Debug, Tabled, Serialize)]
pub struct HistoryRow {
    #[tabled(rename = "#")]
    pub step: usize,
    #[tabled(rename = "Configuration")]
    pub configuration: String,
    #[tabled(rename = "Run")]
    pub run_id: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "p99 (ms)")]
    pub p99: String,
    #[tabled(rename = "Fail %")]
    pub percent_fail: String,
}

/// One row per tested configuration, showing only the walked parameters
pub fn history_rows(plan: &Plan) -> Vec<HistoryRow> {
    let walked: Vec<&str> = plan
        .dimensions()
        .iter()
        .filter(|d| d.values.len() > 1)
        .map(|d| d.name.as_str())
        .collect();

    plan.history()
        .iter()
        .enumerate()
        .map(|(i, tested)| {
            let configuration = walked
                .iter()
                .filter_map(|name| tested.configuration.get(name).map(|v| format!("{}={}", name, v)))
                .collect::<Vec<_>>()
                .join(" ");
            let run = tested.last_run();
            HistoryRow {
                step: i + 1,
                configuration,
                run_id: run.map(|r| r.id.clone()).unwrap_or_default(),
                result: run.map(pass_fail).unwrap_or_else(|| "-".to_string()),
                p99: run.map(|r| metric(r, metrics::LATENCY_SUCCESS_P99)).unwrap_or_default(),
                percent_fail: run.map(|r| metric(r, metrics::PERCENT_FAIL)).unwrap_or_default(),
            }
        })
        .collect()
}

/// Pass/fail grid of a phase: one row per tested combination of the other
/// walked parameters, one column per throughput. The first row is the header.
pub fn grid_cells(plan: &Plan) -> Vec<Vec<String>> {
    if plan.history().is_empty() {
        return Vec::new();
    }
    let throughputs: Vec<&str> = plan
        .dimensions()
        .iter()
        .find(|d| d.name == params::STEADY_STATE_TPS)
        .map(|d| d.values.iter().map(String::as_str).collect())
        .unwrap_or_default();
    let row_dimensions: Vec<&str> = plan
        .dimensions()
        .iter()
        .filter(|d| d.values.len() > 1 && d.name != params::STEADY_STATE_TPS)
        .map(|d| d.name.as_str())
        .collect();

    let row_key = |configuration: &perfsize_lib::Configuration| -> Vec<String> {
        row_dimensions
            .iter()
            .map(|name| configuration.get(name).unwrap_or("-").to_string())
            .collect()
    };

    let mut keys: Vec<Vec<String>> = Vec::new();
    for tested in plan.history() {
        let key = row_key(&tested.configuration);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    let mut header: Vec<String> = if row_dimensions.is_empty() {
        vec!["TPS".to_string()]
    } else {
        row_dimensions.iter().map(|name| name.to_string()).collect()
    };
    header.extend(throughputs.iter().map(|tps| tps.to_string()));

    let mut cells = vec![header];
    for key in keys {
        let mut row = if key.is_empty() { vec![String::new()] } else { key.clone() };
        for tps in &throughputs {
            let cell = plan
                .history()
                .iter()
                .rev()
                .find(|tested| {
                    tested.configuration.get(params::STEADY_STATE_TPS) == Some(*tps)
                        && row_key(&tested.configuration) == key
                })
                .and_then(|tested| tested.last_run())
                .map(pass_fail)
                .unwrap_or_default();
            row.push(cell);
        }
        cells.push(row);
    }
    cells
}

/// Print the pass/fail grid of a phase
pub fn print_grid(plan: &Plan) {
    let cells = grid_cells(plan);
    if cells.is_empty() {
        return;
    }
    let mut builder = Builder::default();
    for row in cells {
        builder.push_record(row);
    }
    println!("{}", builder.build().with(Style::rounded()));
}

fn metric(run: &Run, name: &str) -> String {
    match run.result(name).and_then(|r| r.value) {
        Some(value) => format!("{:.2}", value),
        None => "-".to_string(),
    }
}

/// Colored PASS/FAIL
pub fn pass_fail(run: &Run) -> String {
    if run.is_success() {
        "PASS".green().to_string()
    } else {
        "FAIL".red().to_string()
    }
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color endpoint status based on value
pub fn color_status(status: &str) -> String {
    match status {
        "InService" => status.green().to_string(),
        "Provisioning" | "Updating" | "Deleting" => status.yellow().to_string(),
        "Failed" => status.red().to_string(),
        _ => status.dimmed().to_string(),
    }
}

/// Section heading with an underline
pub fn print_heading(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(60));
}
