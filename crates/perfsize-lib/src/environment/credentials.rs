//! Credentials for the HTTP control plane
//!
//! Providers are asked for a token on every request so that rotated
//! credentials are picked up mid-job.

use std::fmt;
use std::path::PathBuf;

/// Bearer token presented to the control plane
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("token", &"<redacted>").finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("environment variable {0} is not set")]
    MissingVariable(String),

    #[error("failed to read credentials file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credentials from {0} are empty")]
    Empty(String),
}

/// Source of fresh credentials
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> Result<Credentials, CredentialsError>;
}

/// Reads the token from an environment variable on every call
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    variable: String,
}

impl EnvCredentials {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new("PERFSIZE_CONTROL_PLANE_TOKEN")
    }
}

impl CredentialsProvider for EnvCredentials {
    fn credentials(&self) -> Result<Credentials, CredentialsError> {
        let token = std::env::var(&self.variable)
            .map_err(|_| CredentialsError::MissingVariable(self.variable.clone()))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialsError::Empty(self.variable.clone()));
        }
        Ok(Credentials::new(token))
    }
}

/// Re-reads a token file on every call
#[derive(Debug, Clone)]
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialsProvider for FileCredentials {
    fn credentials(&self) -> Result<Credentials, CredentialsError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|source| CredentialsError::Read {
            path: self.path.clone(),
            source,
        })?;
        let token = contents.trim();
        if token.is_empty() {
            return Err(CredentialsError::Empty(self.path.display().to_string()));
        }
        Ok(Credentials::new(token))
    }
}

/// Fixed token, for tests and local control planes
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(token),
        }
    }
}

impl CredentialsProvider for StaticCredentials {
    fn credentials(&self) -> Result<Credentials, CredentialsError> {
        Ok(self.credentials.clone())
    }
}
