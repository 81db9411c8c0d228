//! Configuration management for the CLI
//!
//! Settings come from an optional TOML file and `PERFSIZE_` environment
//! variables, the latter taking precedence.

use anyhow::{Context, Result};
use perfsize_lib::environment::{
    CredentialsProvider, EnvCredentials, FileCredentials, HttpControlPlane,
};
use perfsize_lib::{CommandLoadGenerator, Reconciler, WaitConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// CLI configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SizerConfig {
    /// Control plane gateway URL
    #[serde(default)]
    pub control_plane_url: Option<String>,

    /// Environment variable holding the control plane token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Token file, re-read on every request; wins over `token_env`
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Delay between endpoint status polls
    #[serde(default = "default_wait_delay")]
    pub wait_delay_secs: u64,

    #[serde(default = "default_in_service_attempts")]
    pub in_service_max_attempts: u32,

    #[serde(default = "default_deleted_attempts")]
    pub deleted_max_attempts: u32,

    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// JSON map of instance type to hourly rate
    #[serde(default)]
    pub cost_file: Option<PathBuf>,

    /// External load generator printing a JSON report
    #[serde(default)]
    pub load_command: Option<String>,

    #[serde(default)]
    pub load_args: Vec<String>,

    #[serde(default)]
    pub load_timeout_secs: Option<u64>,
}

fn default_token_env() -> String {
    "PERFSIZE_CONTROL_PLANE_TOKEN".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_wait_delay() -> u64 {
    30
}

fn default_in_service_attempts() -> u32 {
    120
}

fn default_deleted_attempts() -> u32 {
    60
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("perfsize-results-dir")
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            control_plane_url: None,
            token_env: default_token_env(),
            token_file: None,
            request_timeout_secs: default_request_timeout(),
            wait_delay_secs: default_wait_delay(),
            in_service_max_attempts: default_in_service_attempts(),
            deleted_max_attempts: default_deleted_attempts(),
            results_dir: default_results_dir(),
            cost_file: None,
            load_command: None,
            load_args: Vec::new(),
            load_timeout_secs: None,
        }
    }
}

impl SizerConfig {
    /// Load from `path` (or the default location) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                anyhow::ensure!(path.exists(), "Config file not found: {}", path.display());
                Some(path.to_path_buf())
            }
            None => Self::default_path().filter(|p| p.exists()),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            builder = builder.add_source(config::File::from(file.as_path()));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("PERFSIZE")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("load_args"),
            )
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// `~/.config/perfsize/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        let home = dirs_next::home_dir()?;
        Some(home.join(".config").join("perfsize").join("config.toml"))
    }

    /// Reconciler backed by the HTTP control plane gateway
    pub fn reconciler(&self, region: &str) -> Result<Reconciler> {
        let url = self
            .control_plane_url
            .as_deref()
            .context("control_plane_url is not configured (set PERFSIZE_CONTROL_PLANE_URL or use --simulate)")?;

        let credentials: Arc<dyn CredentialsProvider> = match &self.token_file {
            Some(path) => Arc::new(FileCredentials::new(path)),
            None => Arc::new(EnvCredentials::new(&self.token_env)),
        };

        let control_plane = HttpControlPlane::builder()
            .base_url(url)
            .region(region)
            .request_timeout(Duration::from_secs(self.request_timeout_secs))
            .credentials(credentials)
            .build()?;

        Ok(self.waits(Reconciler::new(Arc::new(control_plane))))
    }

    /// Apply the configured polling schedule
    pub fn waits(&self, reconciler: Reconciler) -> Reconciler {
        let delay = Duration::from_secs(self.wait_delay_secs);
        reconciler
            .with_in_service_wait(WaitConfig::new(delay, self.in_service_max_attempts))
            .with_deleted_wait(WaitConfig::new(delay, self.deleted_max_attempts))
    }

    pub fn load_generator(&self) -> Result<CommandLoadGenerator> {
        let program = self
            .load_command
            .as_deref()
            .context("load_command is not configured (set PERFSIZE_LOAD_COMMAND or use --simulate)")?;

        let mut generator = CommandLoadGenerator::new(program).args(self.load_args.iter().cloned());
        if let Some(secs) = self.load_timeout_secs {
            generator = generator.timeout(Duration::from_secs(secs));
        }
        Ok(generator)
    }
}
