//! In-memory control plane
//!
//! Simulates eventual consistency: a created endpoint reports
//! `Provisioning` for a number of polls before turning `InService`, and a
//! deleted one reports `Deleting` before it disappears. Every mutating call
//! is logged so callers can assert on the exact writes issued.

use super::{
    ControlPlane, ControlPlaneError, EndpointConfigSpec, EndpointDescription, EndpointStatus,
    ScalableTarget, ScalingPolicy, VariantDescription,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct MemoryEndpoint {
    config_name: String,
    status: EndpointStatus,
    polls_remaining: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    endpoints: HashMap<String, MemoryEndpoint>,
    configs: HashMap<String, EndpointConfigSpec>,
    targets: HashMap<String, ScalableTarget>,
    policies: HashMap<String, ScalingPolicy>,
    writes: Vec<String>,
    stuck: HashSet<String>,
    read_lag: u32,
    hidden_reads: HashMap<String, u32>,
    failures: HashMap<String, ControlPlaneError>,
}

/// Control plane simulation backed by process memory
#[derive(Debug)]
pub struct InMemoryControlPlane {
    state: Mutex<MemoryState>,
    provisioning_polls: u32,
    deleting_polls: u32,
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryControlPlane {
    /// One transitional poll for both creation and deletion
    pub fn new() -> Self {
        Self::with_transition_polls(1, 1)
    }

    /// Number of polls that still report the transitional status
    pub fn with_transition_polls(provisioning_polls: u32, deleting_polls: u32) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            provisioning_polls,
            deleting_polls,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Place an endpoint and its config directly, bypassing the write log
    pub fn seed_endpoint(&self, endpoint_name: &str, spec: EndpointConfigSpec, status: EndpointStatus) {
        let mut state = self.lock();
        let polls_remaining = match status {
            EndpointStatus::Deleting => self.deleting_polls,
            _ => self.provisioning_polls,
        };
        state.endpoints.insert(
            endpoint_name.to_string(),
            MemoryEndpoint {
                config_name: spec.endpoint_config_name.clone(),
                status,
                polls_remaining,
            },
        );
        state.configs.insert(spec.endpoint_config_name.clone(), spec);
    }

    /// Place an endpoint config directly, bypassing the write log
    pub fn seed_endpoint_config(&self, spec: EndpointConfigSpec) {
        self.lock().configs.insert(spec.endpoint_config_name.clone(), spec);
    }

    /// Place autoscaling directly, bypassing the write log
    pub fn seed_autoscaling(&self, resource_id: &str, target: ScalableTarget, policy: Option<ScalingPolicy>) {
        let mut state = self.lock();
        state.targets.insert(resource_id.to_string(), target);
        if let Some(policy) = policy {
            state.policies.insert(resource_id.to_string(), policy);
        }
    }

    /// Freeze an endpoint in its current transitional status
    pub fn set_stuck(&self, endpoint_name: &str, stuck: bool) {
        let mut state = self.lock();
        if stuck {
            state.stuck.insert(endpoint_name.to_string());
        } else {
            state.stuck.remove(endpoint_name);
        }
    }

    /// Report a freshly created endpoint as missing for its next `reads` describes
    pub fn set_read_lag(&self, reads: u32) {
        self.lock().read_lag = reads;
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: &str, error: ControlPlaneError) {
        self.lock().failures.insert(operation.to_string(), error);
    }

    /// Mutating calls issued so far, as `operation:resource`
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    pub fn endpoint_count(&self) -> usize {
        self.lock().endpoints.len()
    }

    pub fn has_endpoint_config(&self, endpoint_config_name: &str) -> bool {
        self.lock().configs.contains_key(endpoint_config_name)
    }

    pub fn scalable_target(&self, resource_id: &str) -> Option<ScalableTarget> {
        self.lock().targets.get(resource_id).cloned()
    }

    pub fn scaling_policy(&self, resource_id: &str) -> Option<ScalingPolicy> {
        self.lock().policies.get(resource_id).cloned()
    }

    fn take_failure(state: &mut MemoryState, operation: &str) -> Result<(), ControlPlaneError> {
        match state.failures.remove(operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn record(state: &mut MemoryState, operation: &str, resource: &str) -> Result<(), ControlPlaneError> {
        state.writes.push(format!("{}:{}", operation, resource));
        Self::take_failure(state, operation)
    }

    fn not_found(kind: &str, name: &str) -> ControlPlaneError {
        ControlPlaneError::NotFound(format!("{} {} does not exist", kind, name))
    }

    fn conflict(message: String) -> ControlPlaneError {
        ControlPlaneError::Api { status: 409, message }
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn describe_endpoint(&self, endpoint_name: &str) -> Result<EndpointDescription, ControlPlaneError> {
        let mut state = self.lock();
        Self::take_failure(&mut state, "describe_endpoint")?;
        if let Some(hidden) = state.hidden_reads.get_mut(endpoint_name) {
            if *hidden > 0 {
                *hidden -= 1;
                return Err(Self::not_found("endpoint", endpoint_name));
            }
        }
        let stuck = state.stuck.contains(endpoint_name);

        let endpoint = state
            .endpoints
            .get_mut(endpoint_name)
            .ok_or_else(|| Self::not_found("endpoint", endpoint_name))?;

        if endpoint.status.is_transitional() && !stuck {
            if endpoint.polls_remaining == 0 {
                endpoint.status = match endpoint.status {
                    EndpointStatus::Deleting => EndpointStatus::Absent,
                    _ => EndpointStatus::InService,
                };
            } else {
                endpoint.polls_remaining -= 1;
            }
        }

        let endpoint = endpoint.clone();
        if endpoint.status == EndpointStatus::Absent {
            state.endpoints.remove(endpoint_name);
            return Err(Self::not_found("endpoint", endpoint_name));
        }

        // Variants only show up once provisioning is done.
        let variant = match endpoint.status {
            EndpointStatus::Provisioning => None,
            _ => state
                .configs
                .get(&endpoint.config_name)
                .map(|config| VariantDescription {
                    variant_name: config.variant_name.clone(),
                    current_instance_count: config.initial_instance_count,
                    desired_instance_count: config.initial_instance_count,
                }),
        };

        Ok(EndpointDescription {
            endpoint_name: endpoint_name.to_string(),
            status: endpoint.status.as_str().to_string(),
            endpoint_config_name: Some(endpoint.config_name),
            variant,
        })
    }

    async fn create_endpoint(&self, endpoint_name: &str, endpoint_config_name: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.lock();
        Self::record(&mut state, "create_endpoint", endpoint_name)?;
        if state.endpoints.contains_key(endpoint_name) {
            return Err(Self::conflict(format!("endpoint {} already exists", endpoint_name)));
        }
        if !state.configs.contains_key(endpoint_config_name) {
            return Err(Self::conflict(format!(
                "could not find endpoint config {}",
                endpoint_config_name
            )));
        }
        state.endpoints.insert(
            endpoint_name.to_string(),
            MemoryEndpoint {
                config_name: endpoint_config_name.to_string(),
                status: EndpointStatus::Provisioning,
                polls_remaining: self.provisioning_polls,
            },
        );
        let lag = state.read_lag;
        state.hidden_reads.insert(endpoint_name.to_string(), lag);
        Ok(())
    }

    async fn delete_endpoint(&self, endpoint_name: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.lock();
        Self::record(&mut state, "delete_endpoint", endpoint_name)?;
        let deleting_polls = self.deleting_polls;
        let endpoint = state
            .endpoints
            .get_mut(endpoint_name)
            .ok_or_else(|| Self::not_found("endpoint", endpoint_name))?;

        match endpoint.status {
            EndpointStatus::InService | EndpointStatus::Failed => {
                endpoint.status = EndpointStatus::Deleting;
                endpoint.polls_remaining = deleting_polls;
                Ok(())
            }
            EndpointStatus::Deleting => Ok(()),
            other => Err(Self::conflict(format!(
                "cannot delete endpoint {} while it is {}",
                endpoint_name, other
            ))),
        }
    }

    async fn describe_endpoint_config(&self, endpoint_config_name: &str) -> Result<EndpointConfigSpec, ControlPlaneError> {
        let mut state = self.lock();
        Self::take_failure(&mut state, "describe_endpoint_config")?;
        state
            .configs
            .get(endpoint_config_name)
            .cloned()
            .ok_or_else(|| Self::not_found("endpoint config", endpoint_config_name))
    }

    async fn create_endpoint_config(&self, spec: &EndpointConfigSpec) -> Result<(), ControlPlaneError> {
        let mut state = self.lock();
        Self::record(&mut state, "create_endpoint_config", &spec.endpoint_config_name)?;
        if state.configs.contains_key(&spec.endpoint_config_name) {
            return Err(Self::conflict(format!(
                "endpoint config {} already exists",
                spec.endpoint_config_name
            )));
        }
        state.configs.insert(spec.endpoint_config_name.clone(), spec.clone());
        Ok(())
    }

    async fn delete_endpoint_config(&self, endpoint_config_name: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.lock();
        Self::record(&mut state, "delete_endpoint_config", endpoint_config_name)?;
        let in_use = state
            .endpoints
            .values()
            .any(|e| e.config_name == endpoint_config_name && e.status != EndpointStatus::Deleting);
        if in_use {
            return Err(Self::conflict(format!(
                "endpoint config {} is in use",
                endpoint_config_name
            )));
        }
        state
            .configs
            .remove(endpoint_config_name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("endpoint config", endpoint_config_name))
    }

    async fn describe_scalable_target(&self, resource_id: &str) -> Result<Option<ScalableTarget>, ControlPlaneError> {
        let mut state = self.lock();
        Self::take_failure(&mut state, "describe_scalable_target")?;
        Ok(state.targets.get(resource_id).cloned())
    }

    async fn register_scalable_target(&self, resource_id: &str, target: &ScalableTarget) -> Result<(), ControlPlaneError> {
        let mut state = self.lock();
        Self::record(&mut state, "register_scalable_target", resource_id)?;
        state.targets.insert(resource_id.to_string(), target.clone());
        Ok(())
    }

    async fn deregister_scalable_target(&self, resource_id: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.lock();
        Self::record(&mut state, "deregister_scalable_target", resource_id)?;
        // Deregistering a target drops its policies too.
        state.policies.remove(resource_id);
        state
            .targets
            .remove(resource_id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("scalable target", resource_id))
    }

    async fn describe_scaling_policy(&self, resource_id: &str) -> Result<Option<ScalingPolicy>, ControlPlaneError> {
        let mut state = self.lock();
        Self::take_failure(&mut state, "describe_scaling_policy")?;
        Ok(state.policies.get(resource_id).cloned())
    }

    async fn put_scaling_policy(&self, resource_id: &str, policy: &ScalingPolicy) -> Result<(), ControlPlaneError> {
        let mut state = self.lock();
        Self::record(&mut state, "put_scaling_policy", resource_id)?;
        if !state.targets.contains_key(resource_id) {
            return Err(Self::conflict(format!(
                "no scalable target registered for {}",
                resource_id
            )));
        }
        state.policies.insert(resource_id.to_string(), policy.clone());
        Ok(())
    }

    async fn delete_scaling_policy(&self, resource_id: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.lock();
        Self::record(&mut state, "delete_scaling_policy", resource_id)?;
        state
            .policies
            .remove(resource_id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("scaling policy", resource_id))
    }
}
