//! `ClusterService` (§4.I): node registration, heartbeat acceptance,
//! lookup/list/watch, and cluster summary — the read/control surface over
//! the same registry the agent writes to directly.

use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use fleetd_core::node::{Node, NodeCondition, NodeRole, NodeStatus, Resources};
use fleetd_core::pagination::{paginate, PageRequest, PageResponse};
use fleetd_core::{ClusterConfig, InstanceType, NodeId};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api_error::ApiError;
use crate::state::AppState;
use crate::watch::node_event_stream;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cluster/nodes", post(register_node).get(list_nodes))
        .route("/cluster/nodes/:id", get(get_node).delete(deregister_node))
        .route("/cluster/nodes/:id/heartbeat", post(heartbeat))
        .route("/cluster/nodes/watch", get(watch_nodes))
        .route("/cluster/info", get(cluster_info))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct RegisterNodeRequest {
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    pub region: String,
    pub zone: String,
    pub capacity: Resources,
    pub supported_instance_types: HashSet<InstanceType>,
}

#[derive(Debug, Serialize)]
pub struct RegisterNodeResponse {
    pub node_id: String,
    pub heartbeat_interval_seconds: u64,
}

async fn register_node(
    State(state): State<AppState>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<Json<RegisterNodeResponse>, ApiError> {
    let node_id = NodeId(uuid::Uuid::new_v4().to_string());
    let node = Node {
        schema_version: 1,
        id: node_id.clone(),
        hostname: req.hostname,
        ip: req.ip,
        port: req.port,
        role: NodeRole::Worker,
        status: NodeStatus::Pending,
        region: req.region,
        zone: req.zone,
        capacity: req.capacity,
        allocatable: req.capacity,
        allocated: Resources::default(),
        supported_instance_types: req.supported_instance_types,
        conditions: Vec::new(),
        created_at: chrono::Utc::now(),
        last_seen: chrono::Utc::now(),
    };
    state.registry.put_node(&node).await?;
    info!(node_id = %node_id, "node registered");

    // §9.1: computed once here and echoed unchanged by every subsequent
    // heartbeat accept; the agent takes it as a hint for its own interval.
    let heartbeat_interval_seconds = ClusterConfig::default().heartbeat_interval_seconds;
    Ok(Json(RegisterNodeResponse {
        node_id: node_id.0,
        heartbeat_interval_seconds,
    }))
}

async fn deregister_node(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), ApiError> {
    state.registry.delete_node(&NodeId(id)).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub status: NodeStatus,
    pub allocated: Resources,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
    pub lease_ttl_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub next_heartbeat_seconds: u64,
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let node_id = NodeId(id);
    let mut node = state
        .registry
        .get_node(&node_id)
        .await?
        .ok_or_else(|| fleetd_core::ClusterError::not_found(format!("node {node_id}")))?;
    node.status = req.status;
    node.allocated = req.allocated;
    node.conditions = req.conditions;
    node.last_seen = chrono::Utc::now();
    node.check_invariant()?;
    state.registry.heartbeat_node(&node, req.lease_ttl_seconds).await?;
    Ok(Json(HeartbeatResponse {
        next_heartbeat_seconds: ClusterConfig::default().heartbeat_interval_seconds,
    }))
}

async fn get_node(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Node>, ApiError> {
    let node = state
        .node_monitor
        .get_node(&NodeId(id.clone()))
        .ok_or_else(|| fleetd_core::ClusterError::not_found(format!("node {id}")))?;
    Ok(Json(node))
}

async fn list_nodes(
    State(state): State<AppState>,
    Query(page): Query<PageRequest>,
) -> Result<Json<PageResponse<Node>>, ApiError> {
    let mut nodes = state.node_monitor.list_nodes();
    nodes.sort_by(|a, b| a.id.0.cmp(&b.id.0));
    Ok(Json(paginate(&nodes, &page)))
}

async fn watch_nodes(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    Sse::new(node_event_stream(state.registry.clone())).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
pub struct ClusterInfo {
    pub node_count: usize,
    pub ready_node_count: usize,
    pub instance_count: usize,
}

async fn cluster_info(State(state): State<AppState>) -> Result<Json<ClusterInfo>, ApiError> {
    let nodes = state.node_monitor.list_nodes();
    let instances = state.registry.list_instances().await?;
    Ok(Json(ClusterInfo {
        node_count: nodes.len(),
        ready_node_count: nodes.iter().filter(|n| n.is_ready()).count(),
        instance_count: instances.len(),
    }))
}
