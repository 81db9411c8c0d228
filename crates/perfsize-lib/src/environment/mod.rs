//! Environment reconciliation for a single hosting endpoint
//!
//! This module provides:
//! - A declarative snapshot of live infrastructure ([`RemoteResourceState`])
//! - The desired state derived from a configuration ([`DesiredState`])
//! - The control-plane seam ([`ControlPlane`]) with an HTTP client and an
//!   in-memory simulation
//! - The idempotent [`Reconciler`] that converges one to the other

mod credentials;
mod http;
mod memory;
mod reconciler;


pub use credentials::{
    Credentials, CredentialsError, CredentialsProvider, EnvCredentials, FileCredentials,
    StaticCredentials,
};
pub use http::{HttpControlPlane, HttpControlPlaneBuilder};
pub use memory::InMemoryControlPlane;
pub use reconciler::{ConvergeOutcome, EndpointId, Reconciler, WaitConfig, WaitGoal};

use crate::models::{params, Configuration, PlanError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Autoscaling dimension managed on the endpoint variant
pub const SCALABLE_DIMENSION: &str = "sagemaker:variant:DesiredInstanceCount";

/// Name of the single target-tracking policy attached to an endpoint
pub const SCALING_POLICY_NAME: &str = "SageMakerEndpointInvocationScalingPolicy";

/// Default target-tracking metric
pub const INVOCATIONS_PER_INSTANCE: &str = "SageMakerVariantInvocationsPerInstance";

/// Autoscaling resource identifier of an endpoint variant
pub fn resource_id(endpoint_name: &str, variant_name: &str) -> String {
    format!("endpoint/{}/variant/{}", endpoint_name, variant_name)
}

/// Lifecycle status of a hosting endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    Absent,
    Provisioning,
    InService,
    Updating,
    RollingBack,
    Failed,
    Deleting,
}

/// What teardown must do with an endpoint in a given status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownAction {
    /// Stable endpoint, delete right away
    Delete,
    /// Mid-transition, wait for a stable status before deleting
    WaitThenDelete,
    /// Deletion already in progress
    AwaitDeletion,
    /// Nothing to delete
    Nothing,
}

impl EndpointStatus {
    /// Parse a status string as reported by the control plane
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "NotFound" | "Absent" => Some(Self::Absent),
            "Creating" | "Provisioning" => Some(Self::Provisioning),
            "InService" => Some(Self::InService),
            "Updating" | "SystemUpdating" => Some(Self::Updating),
            "RollingBack" => Some(Self::RollingBack),
            "Failed" | "OutOfService" => Some(Self::Failed),
            "Deleting" => Some(Self::Deleting),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "Absent",
            Self::Provisioning => "Provisioning",
            Self::InService => "InService",
            Self::Updating => "Updating",
            Self::RollingBack => "RollingBack",
            Self::Failed => "Failed",
            Self::Deleting => "Deleting",
        }
    }

    /// Transitions are driven by the control plane and must be waited out
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Self::Provisioning | Self::Updating | Self::RollingBack | Self::Deleting
        )
    }

    pub fn teardown_action(&self) -> TeardownAction {
        match self {
            Self::InService | Self::Failed => TeardownAction::Delete,
            Self::Provisioning | Self::Updating | Self::RollingBack => TeardownAction::WaitThenDelete,
            Self::Deleting => TeardownAction::AwaitDeletion,
            Self::Absent => TeardownAction::Nothing,
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered autoscaling bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalableTarget {
    pub min_capacity: u32,
    pub max_capacity: u32,
}

/// Target-tracking scaling policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub metric: String,
    pub target_value: f64,
}

/// Snapshot of one endpoint and everything hanging off it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResourceState {
    pub endpoint_name: String,
    pub status: EndpointStatus,
    pub endpoint_config_name: Option<String>,
    pub variant_name: Option<String>,
    pub model_name: Option<String>,
    pub instance_type: Option<String>,
    pub initial_instance_count: Option<u32>,
    pub current_instance_count: Option<u32>,
    pub desired_instance_count: Option<u32>,
    pub scalable_target: Option<ScalableTarget>,
    pub scaling_policy: Option<ScalingPolicy>,
}

impl RemoteResourceState {
    /// Sentinel state for an endpoint that does not exist
    pub fn absent(endpoint_name: impl Into<String>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            status: EndpointStatus::Absent,
            endpoint_config_name: None,
            variant_name: None,
            model_name: None,
            instance_type: None,
            initial_instance_count: None,
            current_instance_count: None,
            desired_instance_count: None,
            scalable_target: None,
            scaling_policy: None,
        }
    }

    pub fn scaling_enabled(&self) -> bool {
        self.scalable_target.is_some() || self.scaling_policy.is_some()
    }
}

/// Autoscaling bounds and policy requested for an endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalingSpec {
    pub min_instance_count: u32,
    pub max_instance_count: u32,
    pub metric: String,
    pub target_value: f64,
}

/// Infrastructure a configuration asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub variant_name: String,
    pub model_name: String,
    pub instance_type: String,
    /// Defaults to the autoscaling floor when omitted
    pub instance_count: Option<u32>,
    pub autoscaling: Option<AutoscalingSpec>,
}

impl DesiredState {
    /// Derive the desired infrastructure from a sizing configuration
    ///
    /// Traffic parameters are ignored, so configurations that differ only in
    /// load shape map to the same desired state.
    pub fn from_configuration(configuration: &Configuration) -> Result<Self, PlanError> {
        let scaling_enabled = configuration
            .get(params::SCALING_ENABLED)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let autoscaling = if scaling_enabled {
            Some(AutoscalingSpec {
                min_instance_count: configuration.parse(params::SCALING_MIN_INSTANCE_COUNT)?,
                max_instance_count: configuration.parse(params::SCALING_MAX_INSTANCE_COUNT)?,
                metric: configuration
                    .get(params::SCALING_METRIC)
                    .unwrap_or(INVOCATIONS_PER_INSTANCE)
                    .to_string(),
                target_value: configuration.parse(params::SCALING_TARGET)?,
            })
        } else {
            None
        };

        let instance_count = match configuration.get(params::INITIAL_INSTANCE_COUNT) {
            Some(_) => Some(configuration.parse(params::INITIAL_INSTANCE_COUNT)?),
            None if scaling_enabled => None,
            None => {
                return Err(PlanError::MissingParameter(
                    params::INITIAL_INSTANCE_COUNT.to_string(),
                ))
            }
        };

        Ok(Self {
            variant_name: configuration.require(params::VARIANT_NAME)?.to_string(),
            model_name: configuration.require(params::MODEL_NAME)?.to_string(),
            instance_type: configuration.require(params::INSTANCE_TYPE)?.to_string(),
            instance_count,
            autoscaling,
        })
    }

    /// Instance count the endpoint is created with
    pub fn initial_instance_count(&self) -> Option<u32> {
        self.instance_count
            .or_else(|| self.autoscaling.as_ref().map(|a| a.min_instance_count))
    }

    /// Check the request before any remote call is made
    pub fn validate(&self) -> Result<(), String> {
        match self.initial_instance_count() {
            None => return Err("instance count is required without autoscaling".to_string()),
            Some(0) => return Err("instance count must be greater than 0".to_string()),
            Some(_) => {}
        }
        if self.variant_name.is_empty() || self.model_name.is_empty() || self.instance_type.is_empty() {
            return Err("variant, model and instance type must be set".to_string());
        }
        if let Some(scaling) = &self.autoscaling {
            if scaling.min_instance_count == 0 {
                return Err("autoscaling minimum instance count must be greater than 0".to_string());
            }
            if scaling.max_instance_count < scaling.min_instance_count {
                return Err(format!(
                    "autoscaling maximum {} is below minimum {}",
                    scaling.max_instance_count, scaling.min_instance_count
                ));
            }
            if scaling.target_value <= 0.0 {
                return Err("autoscaling target value must be greater than 0".to_string());
            }
            if scaling.metric.is_empty() {
                return Err("autoscaling metric must be set".to_string());
            }
        }
        Ok(())
    }

    /// Full remote state implied by this request once converged
    pub fn expected(&self, endpoint: &EndpointId) -> RemoteResourceState {
        let count = self.initial_instance_count();
        RemoteResourceState {
            endpoint_name: endpoint.endpoint_name.clone(),
            status: EndpointStatus::InService,
            endpoint_config_name: Some(endpoint.endpoint_config_name.clone()),
            variant_name: Some(self.variant_name.clone()),
            model_name: Some(self.model_name.clone()),
            instance_type: Some(self.instance_type.clone()),
            initial_instance_count: count,
            current_instance_count: count,
            desired_instance_count: count,
            scalable_target: self.autoscaling.as_ref().map(|a| ScalableTarget {
                min_capacity: a.min_instance_count,
                max_capacity: a.max_instance_count,
            }),
            scaling_policy: self.autoscaling.as_ref().map(|a| ScalingPolicy {
                metric: a.metric.clone(),
                target_value: a.target_value,
            }),
        }
    }
}

/// Production variant as reported on a live endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDescription {
    pub variant_name: String,
    pub current_instance_count: u32,
    pub desired_instance_count: u32,
}

/// Live endpoint description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescription {
    pub endpoint_name: String,
    /// Raw status string, see [`EndpointStatus::parse`]
    pub status: String,
    pub endpoint_config_name: Option<String>,
    /// Missing while the endpoint is still being created
    pub variant: Option<VariantDescription>,
}

/// Hosting configuration with its single production variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfigSpec {
    pub endpoint_config_name: String,
    pub variant_name: String,
    pub model_name: String,
    pub instance_type: String,
    pub initial_instance_count: u32,
}

/// Errors reported by a control plane
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("control plane rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode control plane response: {0}")]
    Decode(String),

    #[error("failed to obtain credentials: {0}")]
    Credentials(String),
}

impl ControlPlaneError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlPlaneError::NotFound(_))
    }
}

/// Errors that abort reconciliation
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error("endpoint {endpoint} reported unrecognized status {status:?}")]
    UnknownStatus { endpoint: String, status: String },

    #[error("endpoint {endpoint} points at endpoint config {config} which cannot be found")]
    DanglingConfig { endpoint: String, config: String },

    #[error("invalid desired state: {0}")]
    InvalidDesiredState(String),

    #[error("timed out waiting for endpoint {endpoint} to become {goal} after {attempts} polls, last status {last_status}")]
    WaitTimeout {
        endpoint: String,
        goal: WaitGoal,
        attempts: u32,
        last_status: EndpointStatus,
    },

    #[error("endpoint {endpoint} entered status {status} while waiting to become {goal}")]
    EndpointFailed {
        endpoint: String,
        goal: WaitGoal,
        status: EndpointStatus,
    },

    #[error("environment does not match desired state after reconciliation\nexpected: {expected:?}\nactual: {actual:?}")]
    Inconsistent {
        expected: Box<RemoteResourceState>,
        actual: Box<RemoteResourceState>,
    },
}

/// Trait for control planes hosting the endpoint and its autoscaling
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn describe_endpoint(&self, endpoint_name: &str) -> Result<EndpointDescription, ControlPlaneError>;

    async fn create_endpoint(&self, endpoint_name: &str, endpoint_config_name: &str) -> Result<(), ControlPlaneError>;

    async fn delete_endpoint(&self, endpoint_name: &str) -> Result<(), ControlPlaneError>;

    async fn describe_endpoint_config(&self, endpoint_config_name: &str) -> Result<EndpointConfigSpec, ControlPlaneError>;

    async fn create_endpoint_config(&self, spec: &EndpointConfigSpec) -> Result<(), ControlPlaneError>;

    async fn delete_endpoint_config(&self, endpoint_config_name: &str) -> Result<(), ControlPlaneError>;

    async fn describe_scalable_target(&self, resource_id: &str) -> Result<Option<ScalableTarget>, ControlPlaneError>;

    async fn register_scalable_target(&self, resource_id: &str, target: &ScalableTarget) -> Result<(), ControlPlaneError>;

    async fn deregister_scalable_target(&self, resource_id: &str) -> Result<(), ControlPlaneError>;

    async fn describe_scaling_policy(&self, resource_id: &str) -> Result<Option<ScalingPolicy>, ControlPlaneError>;

    async fn put_scaling_policy(&self, resource_id: &str, policy: &ScalingPolicy) -> Result<(), ControlPlaneError>;

    async fn delete_scaling_policy(&self, resource_id: &str) -> Result<(), ControlPlaneError>;
}
