//! Perfsize CLI
//!
//! Sizes a model hosting endpoint: finds a working instance type, the
//! instance count needed at peak throughput and the lowest safe
//! autoscaling floor, then reports hosting cost.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{cost, environment, run};
use perfsize_lib::EndpointId;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Perfsize CLI
#[derive(Parser)]
#[command(name = "perfsize")]
#[command(author, version, about = "Capacity sizing for model hosting endpoints", long_about = None)]
pub struct Cli {
    /// Path to config file (defaults to ~/.config/perfsize/config.toml)
    #[arg(long, env = "PERFSIZE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Log format written to stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a full sizing campaign
    Run(run::RunArgs),

    /// Show the live state of an endpoint
    Observe {
        #[arg(long, env = "PERFSIZE_REGION")]
        region: String,

        #[arg(long)]
        endpoint_name: String,
    },

    /// Delete an endpoint with its configuration and autoscaling
    Teardown {
        #[arg(long, env = "PERFSIZE_REGION")]
        region: String,

        #[arg(long)]
        endpoint_name: String,

        #[arg(long)]
        endpoint_config_name: String,
    },

    /// Explain the hosting cost of a fleet
    Cost {
        #[arg(long)]
        instance_type: String,

        #[arg(long, default_value_t = 1)]
        instance_count: u32,

        /// JSON map of instance type to hourly rate
        #[arg(long)]
        cost_file: Option<PathBuf>,
    },
}

fn init_tracing(format: LogFormat, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (json, text) = match format {
        LogFormat::Json => (Some(fmt::layer().json().with_writer(std::io::stderr)), None),
        LogFormat::Text => (None, Some(fmt::layer().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry().with(filter).with(json).with(text).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    let config = config::SizerConfig::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run(args) => run::run_campaign(args, &config, cli.format).await,
        Commands::Observe { region, endpoint_name } => {
            environment::observe(&config, &region, &endpoint_name, cli.format).await
        }
        Commands::Teardown {
            region,
            endpoint_name,
            endpoint_config_name,
        } => {
            let endpoint = EndpointId::new(endpoint_name, endpoint_config_name);
            environment::teardown(&config, &region, endpoint, cli.format).await
        }
        Commands::Cost {
            instance_type,
            instance_count,
            cost_file,
        } => cost::explain_cost(&config, cost_file.as_deref(), &instance_type, instance_count, cli.format),
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
