//! Thin `reqwest`-based client for the per-agent RPC surface (§4.H.1):
//! a persistent `reqwest::Client`, a base URL built per call, and HTTP
//! status/JSON error translation back into [`ClusterError`].

use std::collections::HashMap;
use std::time::Duration;

use fleetd_core::instance::{Instance, InstanceType};
use fleetd_core::{ClusterError, ClusterResult, InstanceId, InstanceSpec, Node};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
struct CreateInstanceRequest<'a> {
    instance_id: &'a str,
    name: &'a str,
    #[serde(rename = "type")]
    instance_type: InstanceType,
    spec: &'a InstanceSpec,
    metadata: &'a HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceStatsResponse {
    pub cpu_usage_percent: f64,
    pub memory_bytes_used: u64,
    pub disk_bytes_used: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct AgentErrorBody {
    error: String,
}

#[derive(Clone)]
pub struct AgentClient {
    http: Client,
}

impl AgentClient {
    pub fn new(timeout: Duration) -> ClusterResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClusterError::internal(format!("build agent http client: {e}")))?;
        Ok(Self { http })
    }

    fn base_url(node: &Node) -> String {
        format!("http://{}:{}", node.ip, node.port)
    }

    pub async fn create_instance(
        &self,
        node: &Node,
        instance_id: &InstanceId,
        name: &str,
        instance_type: InstanceType,
        spec: &InstanceSpec,
        metadata: &HashMap<String, String>,
    ) -> ClusterResult<Instance> {
        let body = CreateInstanceRequest {
            instance_id: &instance_id.0,
            name,
            instance_type,
            spec,
            metadata,
        };
        let resp = self
            .http
            .post(format!("{}/instances", Self::base_url(node)))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        decode(resp).await
    }

    pub async fn delete_instance(&self, node: &Node, id: &InstanceId, force: bool) -> ClusterResult<()> {
        let resp = self
            .http
            .delete(format!("{}/instances/{}?force={}", Self::base_url(node), id.0, force))
            .send()
            .await
            .map_err(map_transport_error)?;
        check_status(resp).await.map(|_| ())
    }

    pub async fn start_instance(&self, node: &Node, id: &InstanceId) -> ClusterResult<Instance> {
        let resp = self
            .http
            .post(format!("{}/instances/{}/start", Self::base_url(node), id.0))
            .send()
            .await
            .map_err(map_transport_error)?;
        decode(resp).await
    }

    pub async fn stop_instance(&self, node: &Node, id: &InstanceId, force: bool) -> ClusterResult<Instance> {
        let resp = self
            .http
            .post(format!("{}/instances/{}/stop", Self::base_url(node), id.0))
            .json(&serde_json::json!({"force": force}))
            .send()
            .await
            .map_err(map_transport_error)?;
        decode(resp).await
    }

    pub async fn restart_instance(&self, node: &Node, id: &InstanceId, force: bool) -> ClusterResult<Instance> {
        let resp = self
            .http
            .post(format!("{}/instances/{}/restart", Self::base_url(node), id.0))
            .json(&serde_json::json!({"force": force}))
            .send()
            .await
            .map_err(map_transport_error)?;
        decode(resp).await
    }

    pub async fn get_instance(&self, node: &Node, id: &InstanceId) -> ClusterResult<Instance> {
        let resp = self
            .http
            .get(format!("{}/instances/{}", Self::base_url(node), id.0))
            .send()
            .await
            .map_err(map_transport_error)?;
        decode(resp).await
    }

    pub async fn instance_stats(&self, node: &Node, id: &InstanceId) -> ClusterResult<InstanceStatsResponse> {
        let resp = self
            .http
            .get(format!("{}/instances/{}/stats", Self::base_url(node), id.0))
            .send()
            .await
            .map_err(map_transport_error)?;
        decode(resp).await
    }

    /// The agent's base URL, for proxying `AttachConsole` (§9.1: the
    /// orchestrator mediates rather than handing the address back).
    pub fn console_ws_url(node: &Node, id: &InstanceId) -> String {
        format!("ws://{}:{}/instances/{}/console", node.ip, node.port, id.0)
    }
}

fn map_transport_error(e: reqwest::Error) -> ClusterError {
    ClusterError::unavailable(format!("agent request failed: {e}"))
}

async fn check_status(resp: reqwest::Response) -> ClusterResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: Option<AgentErrorBody> = resp.json().await.ok();
    let message = body.map(|b| b.error).unwrap_or_else(|| status.to_string());
    Err(status_to_error(status, message))
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> ClusterResult<T> {
    let resp = check_status(resp).await?;
    resp.json()
        .await
        .map_err(|e| ClusterError::internal(format!("decode agent response: {e}")))
}

fn status_to_error(status: StatusCode, message: String) -> ClusterError {
    match status {
        StatusCode::BAD_REQUEST => ClusterError::invalid_argument(message),
        StatusCode::NOT_FOUND => ClusterError::not_found(message),
        StatusCode::CONFLICT => ClusterError::already_exists(message),
        StatusCode::PRECONDITION_FAILED => ClusterError::failed_precondition(message),
        StatusCode::INSUFFICIENT_STORAGE => ClusterError::resource_exhausted(message),
        StatusCode::SERVICE_UNAVAILABLE => ClusterError::unavailable(message),
        _ => ClusterError::internal(message),
    }
}
