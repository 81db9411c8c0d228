//! Idempotent reconciler for one endpoint
//!
//! `converge` observes the live state, compares it with the state implied by
//! the desired configuration and only touches the control plane when the two
//! differ. A rebuild is always a full teardown followed by creation, never an
//! in-place update.

use super::{
    resource_id, ControlPlane, ControlPlaneError, DesiredState, EndpointConfigSpec,
    EndpointStatus, ReconcileError, RemoteResourceState, ScalableTarget, ScalingPolicy,
    TeardownAction,
};
use crate::observability::SizerMetrics;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Names the reconciler owns for one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointId {
    pub endpoint_name: String,
    pub endpoint_config_name: String,
}

impl EndpointId {
    pub fn new(endpoint_name: impl Into<String>, endpoint_config_name: impl Into<String>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            endpoint_config_name: endpoint_config_name.into(),
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint_name)
    }
}

/// Polling schedule for one kind of wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl WaitConfig {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self { delay, max_attempts }
    }

    /// Waiting for an endpoint to come up
    pub fn in_service() -> Self {
        Self::new(Duration::from_secs(30), 120)
    }

    /// Waiting for an endpoint to disappear
    pub fn deleted() -> Self {
        Self::new(Duration::from_secs(30), 60)
    }
}

/// Status an endpoint is being waited into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitGoal {
    InService,
    Deleted,
    /// Any status that is not a transition
    Stable,
}

impl fmt::Display for WaitGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitGoal::InService => f.write_str("in service"),
            WaitGoal::Deleted => f.write_str("deleted"),
            WaitGoal::Stable => f.write_str("stable"),
        }
    }
}

/// What `converge` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergeOutcome {
    /// Live state already matched, no write was issued
    Unchanged,
    /// Torn down and recreated
    Rebuilt,
}

impl ConvergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConvergeOutcome::Unchanged => "unchanged",
            ConvergeOutcome::Rebuilt => "rebuilt",
        }
    }
}

/// Reconciler bound to one control plane
#[derive(Clone)]
pub struct Reconciler {
    control_plane: Arc<dyn ControlPlane>,
    in_service_wait: WaitConfig,
    deleted_wait: WaitConfig,
    metrics: SizerMetrics,
}

impl Reconciler {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            control_plane,
            in_service_wait: WaitConfig::in_service(),
            deleted_wait: WaitConfig::deleted(),
            metrics: SizerMetrics::new(),
        }
    }

    pub fn with_in_service_wait(mut self, wait: WaitConfig) -> Self {
        self.in_service_wait = wait;
        self
    }

    pub fn with_deleted_wait(mut self, wait: WaitConfig) -> Self {
        self.deleted_wait = wait;
        self
    }

    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.control_plane
    }

    /// Snapshot the live state of an endpoint
    ///
    /// A missing endpoint yields the absent sentinel. Read-only.
    pub async fn observe(&self, endpoint_name: &str) -> Result<RemoteResourceState, ReconcileError> {
        self.snapshot(endpoint_name, true).await
    }

    /// `strict` turns a missing endpoint config into an error
    async fn snapshot(&self, endpoint_name: &str, strict: bool) -> Result<RemoteResourceState, ReconcileError> {
        let description = match self.control_plane.describe_endpoint(endpoint_name).await {
            Ok(description) => description,
            Err(e) if e.is_not_found() => return Ok(RemoteResourceState::absent(endpoint_name)),
            Err(e) => return Err(e.into()),
        };

        let status = parse_status(endpoint_name, &description.status)?;
        let mut state = RemoteResourceState::absent(endpoint_name);
        state.status = status;
        state.endpoint_config_name = description.endpoint_config_name.clone();

        if let Some(config_name) = &description.endpoint_config_name {
            match self.control_plane.describe_endpoint_config(config_name).await {
                Ok(config) => {
                    state.model_name = Some(config.model_name);
                    state.instance_type = Some(config.instance_type);
                    state.initial_instance_count = Some(config.initial_instance_count);
                    state.variant_name = Some(config.variant_name);
                }
                Err(e) if e.is_not_found() && (!strict || status == EndpointStatus::Deleting) => {
                    debug!(endpoint = %endpoint_name, config = %config_name, "Endpoint config already gone");
                }
                Err(e) if e.is_not_found() => {
                    return Err(ReconcileError::DanglingConfig {
                        endpoint: endpoint_name.to_string(),
                        config: config_name.clone(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(variant) = &description.variant {
            state.variant_name = Some(variant.variant_name.clone());
            state.current_instance_count = Some(variant.current_instance_count);
            state.desired_instance_count = Some(variant.desired_instance_count);

            let id = resource_id(endpoint_name, &variant.variant_name);
            state.scalable_target = self.control_plane.describe_scalable_target(&id).await?;
            state.scaling_policy = self.control_plane.describe_scaling_policy(&id).await?;
        }

        Ok(state)
    }

    /// Make the live environment match `desired`
    ///
    /// Issues no writes when the observed state already equals the expected
    /// state. Otherwise tears everything down, recreates it, and verifies the
    /// result.
    pub async fn converge(
        &self,
        endpoint: &EndpointId,
        desired: &DesiredState,
    ) -> Result<ConvergeOutcome, ReconcileError> {
        desired.validate().map_err(ReconcileError::InvalidDesiredState)?;
        let expected = desired.expected(endpoint);
        let actual = self.snapshot(&endpoint.endpoint_name, false).await?;

        if actual == expected {
            info!(endpoint = %endpoint, "Environment already matches desired state");
            self.metrics.inc_reconciliations(ConvergeOutcome::Unchanged.as_str());
            return Ok(ConvergeOutcome::Unchanged);
        }

        info!(
            endpoint = %endpoint,
            expected = ?expected,
            actual = ?actual,
            "Environment differs from desired state, rebuilding"
        );

        self.teardown(endpoint).await?;
        self.create(endpoint, desired).await?;

        let actual = self.observe(&endpoint.endpoint_name).await?;
        if actual != expected {
            return Err(ReconcileError::Inconsistent {
                expected: Box::new(expected),
                actual: Box::new(actual),
            });
        }

        self.metrics.inc_reconciliations(ConvergeOutcome::Rebuilt.as_str());
        info!(endpoint = %endpoint, "Environment rebuilt");
        Ok(ConvergeOutcome::Rebuilt)
    }

    /// Remove autoscaling, the endpoint and its config, whatever state they are in
    ///
    /// Resources that are already gone are skipped, so teardown can be
    /// repeated safely.
    pub async fn teardown(&self, endpoint: &EndpointId) -> Result<(), ReconcileError> {
        let name = endpoint.endpoint_name.as_str();
        let state = self.snapshot(name, false).await?;

        if let Some(variant_name) = &state.variant_name {
            let id = resource_id(name, variant_name);
            if state.scaling_policy.is_some() {
                self.remove("delete_scaling_policy", self.control_plane.delete_scaling_policy(&id).await)?;
            }
            if state.scalable_target.is_some() {
                self.remove(
                    "deregister_scalable_target",
                    self.control_plane.deregister_scalable_target(&id).await,
                )?;
            }
        }

        match state.status.teardown_action() {
            TeardownAction::Delete => self.delete_endpoint(name).await?,
            TeardownAction::WaitThenDelete => {
                let status = self.wait_for(name, WaitGoal::Stable, self.in_service_wait).await?;
                if status != EndpointStatus::Absent {
                    self.delete_endpoint(name).await?;
                }
            }
            TeardownAction::AwaitDeletion => {
                self.wait_for(name, WaitGoal::Deleted, self.deleted_wait).await?;
            }
            TeardownAction::Nothing => {
                debug!(endpoint = %name, "No endpoint to delete");
            }
        }

        match self.control_plane.describe_endpoint_config(&endpoint.endpoint_config_name).await {
            Ok(_) => {
                self.remove(
                    "delete_endpoint_config",
                    self.control_plane
                        .delete_endpoint_config(&endpoint.endpoint_config_name)
                        .await,
                )?;
            }
            Err(e) if e.is_not_found() => {
                debug!(config = %endpoint.endpoint_config_name, "No endpoint config to delete");
            }
            Err(e) => return Err(e.into()),
        }

        self.metrics.inc_teardowns();
        info!(endpoint = %endpoint, "Environment torn down");
        Ok(())
    }

    async fn create(&self, endpoint: &EndpointId, desired: &DesiredState) -> Result<(), ReconcileError> {
        let initial_instance_count = desired.initial_instance_count().ok_or_else(|| {
            ReconcileError::InvalidDesiredState("instance count is required without autoscaling".to_string())
        })?;

        let spec = EndpointConfigSpec {
            endpoint_config_name: endpoint.endpoint_config_name.clone(),
            variant_name: desired.variant_name.clone(),
            model_name: desired.model_name.clone(),
            instance_type: desired.instance_type.clone(),
            initial_instance_count,
        };
        self.write("create_endpoint_config", self.control_plane.create_endpoint_config(&spec).await)?;
        self.write(
            "create_endpoint",
            self.control_plane
                .create_endpoint(&endpoint.endpoint_name, &endpoint.endpoint_config_name)
                .await,
        )?;
        self.wait_for(&endpoint.endpoint_name, WaitGoal::InService, self.in_service_wait)
            .await?;

        // Target before policy: a policy needs a registered target.
        if let Some(scaling) = &desired.autoscaling {
            let id = resource_id(&endpoint.endpoint_name, &desired.variant_name);
            let target = ScalableTarget {
                min_capacity: scaling.min_instance_count,
                max_capacity: scaling.max_instance_count,
            };
            self.write(
                "register_scalable_target",
                self.control_plane.register_scalable_target(&id, &target).await,
            )?;
            let policy = ScalingPolicy {
                metric: scaling.metric.clone(),
                target_value: scaling.target_value,
            };
            self.write("put_scaling_policy", self.control_plane.put_scaling_policy(&id, &policy).await)?;
        }

        Ok(())
    }

    async fn delete_endpoint(&self, endpoint_name: &str) -> Result<(), ReconcileError> {
        self.remove("delete_endpoint", self.control_plane.delete_endpoint(endpoint_name).await)?;
        self.wait_for(endpoint_name, WaitGoal::Deleted, self.deleted_wait).await?;
        Ok(())
    }

    fn write(&self, operation: &str, result: Result<(), ControlPlaneError>) -> Result<(), ReconcileError> {
        self.metrics.inc_remote_writes(operation);
        result?;
        debug!(operation = %operation, "Control plane write succeeded");
        Ok(())
    }

    /// Like `write`, but a resource that is already gone counts as removed
    fn remove(&self, operation: &str, result: Result<(), ControlPlaneError>) -> Result<(), ReconcileError> {
        match result {
            Err(e) if e.is_not_found() => {
                self.metrics.inc_remote_writes(operation);
                warn!(operation = %operation, error = %e, "Resource already gone");
                Ok(())
            }
            other => self.write(operation, other),
        }
    }

    async fn status(&self, endpoint_name: &str) -> Result<EndpointStatus, ReconcileError> {
        match self.control_plane.describe_endpoint(endpoint_name).await {
            Ok(description) => parse_status(endpoint_name, &description.status),
            Err(e) if e.is_not_found() => Ok(EndpointStatus::Absent),
            Err(e) => Err(e.into()),
        }
    }

    /// Poll until the endpoint reaches `goal`, returning the final status
    async fn wait_for(
        &self,
        endpoint_name: &str,
        goal: WaitGoal,
        wait: WaitConfig,
    ) -> Result<EndpointStatus, ReconcileError> {
        let mut last_status = EndpointStatus::Absent;

        for attempt in 1..=wait.max_attempts {
            self.metrics.inc_wait_polls();
            let status = self.status(endpoint_name).await?;
            last_status = status;

            let reached = match goal {
                WaitGoal::InService => status == EndpointStatus::InService,
                WaitGoal::Deleted => status == EndpointStatus::Absent,
                WaitGoal::Stable => !status.is_transitional(),
            };
            if reached {
                debug!(endpoint = %endpoint_name, goal = %goal, attempt = attempt, "Wait finished");
                return Ok(status);
            }

            let hopeless = match goal {
                // A just-created endpoint may not be visible yet.
                WaitGoal::InService | WaitGoal::Deleted => status == EndpointStatus::Failed,
                WaitGoal::Stable => false,
            };
            if hopeless {
                return Err(ReconcileError::EndpointFailed {
                    endpoint: endpoint_name.to_string(),
                    goal,
                    status,
                });
            }

            debug!(
                endpoint = %endpoint_name,
                goal = %goal,
                status = %status,
                attempt = attempt,
                max_attempts = wait.max_attempts,
                "Waiting on endpoint"
            );
            if attempt < wait.max_attempts {
                tokio::time::sleep(wait.delay).await;
            }
        }

        Err(ReconcileError::WaitTimeout {
            endpoint: endpoint_name.to_string(),
            goal,
            attempts: wait.max_attempts,
            last_status,
        })
    }
}

fn parse_status(endpoint_name: &str, raw: &str) -> Result<EndpointStatus, ReconcileError> {
    EndpointStatus::parse(raw).ok_or_else(|| ReconcileError::UnknownStatus {
        endpoint: endpoint_name.to_string(),
        status: raw.to_string(),
    })
}
