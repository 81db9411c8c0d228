//! HTTP client for a hosting control plane
//!
//! Resources are addressed as:
//! - `endpoints/{name}` and `endpoint-configs/{name}`, the name being a
//!   single percent-encoded path segment
//! - `scalable-targets?resource_id=...` and `scaling-policies?resource_id=...`
//!
//! A 404 maps to [`ControlPlaneError::NotFound`]. Credentials are fetched
//! from the provider for every request.

use super::{
    ControlPlane, ControlPlaneError, CredentialsProvider, EndpointConfigSpec, EndpointDescription,
    ScalableTarget, ScalingPolicy, EnvCredentials, SCALABLE_DIMENSION, SCALING_POLICY_NAME,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const REGION_HEADER: &str = "x-perfsize-region";

#[derive(Debug, Serialize)]
struct CreateEndpointRequest<'a> {
    endpoint_name: &'a str,
    endpoint_config_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScalableTargetList {
    #[serde(default)]
    scalable_targets: Vec<ScalableTarget>,
}

#[derive(Debug, Deserialize)]
struct ScalingPolicyList {
    #[serde(default)]
    scaling_policies: Vec<ScalingPolicy>,
}

/// Control plane reached over HTTP
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: Url,
    region: Option<String>,
    credentials: Arc<dyn CredentialsProvider>,
}

impl HttpControlPlane {
    pub fn builder() -> HttpControlPlaneBuilder {
        HttpControlPlaneBuilder::new()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL extended by `segments`, each encoded as exactly one segment
    fn url(&self, segments: &[&str]) -> Result<Url, ControlPlaneError> {
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(ControlPlaneError::Transport(format!("invalid resource name {:?}", bad)));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ControlPlaneError::Transport(format!("base URL {} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ControlPlaneError> {
        let url = self.url(segments)?;
        let credentials = self
            .credentials
            .credentials()
            .map_err(|e| ControlPlaneError::Credentials(e.to_string()))?;

        let mut builder = self.client.request(method, url).bearer_auth(credentials.token);
        if let Some(region) = &self.region {
            builder = builder.header(REGION_HEADER, region);
        }
        Ok(builder)
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ControlPlaneError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ControlPlaneError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(status = %status, url = %response.url(), "Control plane responded");

        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(ControlPlaneError::NotFound(message));
        }
        Err(ControlPlaneError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ControlPlaneError> {
        let response = self.execute(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ControlPlaneError::Decode(e.to_string()))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<(), ControlPlaneError> {
        self.execute(builder).await.map(|_| ())
    }
}

fn at_most_one<T>(mut items: Vec<T>, kind: &str, resource_id: &str) -> Result<Option<T>, ControlPlaneError> {
    if items.len() > 1 {
        return Err(ControlPlaneError::Decode(format!(
            "expected at most one {} for {}, got {}",
            kind,
            resource_id,
            items.len()
        )));
    }
    Ok(items.pop())
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn describe_endpoint(&self, endpoint_name: &str) -> Result<EndpointDescription, ControlPlaneError> {
        let builder = self.request(Method::GET, &["endpoints", endpoint_name])?;
        self.get_json(builder).await
    }

    async fn create_endpoint(&self, endpoint_name: &str, endpoint_config_name: &str) -> Result<(), ControlPlaneError> {
        let builder = self.request(Method::POST, &["endpoints"])?.json(&CreateEndpointRequest {
            endpoint_name,
            endpoint_config_name,
        });
        self.send(builder).await
    }

    async fn delete_endpoint(&self, endpoint_name: &str) -> Result<(), ControlPlaneError> {
        let builder = self.request(Method::DELETE, &["endpoints", endpoint_name])?;
        self.send(builder).await
    }

    async fn describe_endpoint_config(&self, endpoint_config_name: &str) -> Result<EndpointConfigSpec, ControlPlaneError> {
        let builder = self.request(Method::GET, &["endpoint-configs", endpoint_config_name])?;
        self.get_json(builder).await
    }

    async fn create_endpoint_config(&self, spec: &EndpointConfigSpec) -> Result<(), ControlPlaneError> {
        let builder = self.request(Method::POST, &["endpoint-configs"])?.json(spec);
        self.send(builder).await
    }

    async fn delete_endpoint_config(&self, endpoint_config_name: &str) -> Result<(), ControlPlaneError> {
        let builder = self.request(Method::DELETE, &["endpoint-configs", endpoint_config_name])?;
        self.send(builder).await
    }

    async fn describe_scalable_target(&self, resource_id: &str) -> Result<Option<ScalableTarget>, ControlPlaneError> {
        let builder = self
            .request(Method::GET, &["scalable-targets"])?
            .query(&[("resource_id", resource_id), ("scalable_dimension", SCALABLE_DIMENSION)]);
        let list: ScalableTargetList = self.get_json(builder).await?;
        at_most_one(list.scalable_targets, "scalable target", resource_id)
    }

    async fn register_scalable_target(&self, resource_id: &str, target: &ScalableTarget) -> Result<(), ControlPlaneError> {
        let builder = self
            .request(Method::PUT, &["scalable-targets"])?
            .query(&[("resource_id", resource_id), ("scalable_dimension", SCALABLE_DIMENSION)])
            .json(target);
        self.send(builder).await
    }

    async fn deregister_scalable_target(&self, resource_id: &str) -> Result<(), ControlPlaneError> {
        let builder = self
            .request(Method::DELETE, &["scalable-targets"])?
            .query(&[("resource_id", resource_id), ("scalable_dimension", SCALABLE_DIMENSION)]);
        self.send(builder).await
    }

    async fn describe_scaling_policy(&self, resource_id: &str) -> Result<Option<ScalingPolicy>, ControlPlaneError> {
        let builder = self
            .request(Method::GET, &["scaling-policies"])?
            .query(&[("resource_id", resource_id), ("policy_name", SCALING_POLICY_NAME)]);
        let list: ScalingPolicyList = self.get_json(builder).await?;
        at_most_one(list.scaling_policies, "scaling policy", resource_id)
    }

    async fn put_scaling_policy(&self, resource_id: &str, policy: &ScalingPolicy) -> Result<(), ControlPlaneError> {
        let builder = self
            .request(Method::PUT, &["scaling-policies"])?
            .query(&[("resource_id", resource_id), ("policy_name", SCALING_POLICY_NAME)])
            .json(policy);
        self.send(builder).await
    }

    async fn delete_scaling_policy(&self, resource_id: &str) -> Result<(), ControlPlaneError> {
        let builder = self
            .request(Method::DELETE, &["scaling-policies"])?
            .query(&[("resource_id", resource_id), ("policy_name", SCALING_POLICY_NAME)]);
        self.send(builder).await
    }
}

/// Builder for [`HttpControlPlane`]
pub struct HttpControlPlaneBuilder {
    base_url: Option<String>,
    region: Option<String>,
    request_timeout: Duration,
    connect_timeout: Duration,
    credentials: Option<Arc<dyn CredentialsProvider>>,
}

impl HttpControlPlaneBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            region: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            credentials: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn credentials(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Credentials default to [`EnvCredentials::default`]
    pub fn build(self) -> Result<HttpControlPlane> {
        let raw = self
            .base_url
            .ok_or_else(|| anyhow::anyhow!("base_url is required"))?;
        // Url::join drops the last path segment unless it ends with a slash.
        let normalized = if raw.ends_with('/') { raw } else { format!("{}/", raw) };
        let base_url = Url::parse(&normalized).with_context(|| format!("Invalid base URL: {}", normalized))?;

        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(HttpControlPlane {
            client,
            base_url,
            region: self.region,
            credentials: self
                .credentials
                .unwrap_or_else(|| Arc::new(EnvCredentials::default())),
        })
    }
}

impl Default for HttpControlPlaneBuilder {
    fn default() -> Self {
        Self::new()
    }
}
