//! `ComputeService` (§4.I): create/delete/start/stop/restart, lookup,
//! listing, stats, and instance watch/console streaming. Image listing/pull
//! are delegated to an external collaborator and are not implemented here.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use fleetd_core::instance::{Instance, InstanceType};
use fleetd_core::pagination::{paginate, PageRequest, PageResponse};
use fleetd_core::{ClusterError, InstanceId, InstanceSpec};
use futures::stream::Stream;
use serde::Deserialize;
use tracing::info;

use crate::agent_client::InstanceStatsResponse;
use crate::api_error::ApiError;
use crate::scheduler::{self, PlacementFilter};
use crate::state::AppState;
use crate::watch::single_instance_event_stream;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/compute/instances", post(create_instance).get(list_instances))
        .route(
            "/compute/instances/:id",
            get(get_instance).delete(delete_instance),
        )
        .route("/compute/instances/:id/start", post(start_instance))
        .route("/compute/instances/:id/stop", post(stop_instance))
        .route("/compute/instances/:id/restart", post(restart_instance))
        .route("/compute/instances/:id/stats", get(instance_stats))
        .route("/compute/instances/:id/watch", get(watch_instance))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    pub spec: InstanceSpec,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub preferred_node_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
}

async fn create_instance(
    State(state): State<AppState>,
    Json(req): Json<CreateInstanceRequest>,
) -> Result<Json<Instance>, ApiError> {
    let id = state.registry.create_instance_id();
    let mut instance = Instance {
        schema_version: 1,
        id: id.clone(),
        name: req.name,
        instance_type: req.instance_type,
        state: fleetd_core::InstanceState::Pending,
        spec: req.spec,
        node_id: None,
        ip_address: None,
        metadata: req.metadata,
        state_reason: None,
        created_at: chrono::Utc::now(),
        started_at: None,
    };
    state.registry.put_instance(&instance).await?;
    info!(instance_id = %id, "instance accepted, scheduling");

    let filter = PlacementFilter {
        preferred_node_id: req.preferred_node_id,
        region: req.region,
        zone: req.zone,
    };
    scheduler::schedule(&state.registry, &state.agents, &mut instance, &filter).await?;
    Ok(Json(instance))
}

async fn get_instance(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Instance>, ApiError> {
    let instance = state
        .registry
        .get_instance(&InstanceId(id.clone()))
        .await?
        .ok_or_else(|| ClusterError::not_found(format!("instance {id}")))?;
    Ok(Json(instance))
}

async fn list_instances(
    State(state): State<AppState>,
    Query(page): Query<PageRequest>,
) -> Result<Json<PageResponse<Instance>>, ApiError> {
    let mut instances = state.registry.list_instances().await?;
    instances.sort_by(|a, b| a.id.0.cmp(&b.id.0));
    Ok(Json(paginate(&instances, &page)))
}

#[derive(Debug, Deserialize, Default)]
pub struct DeleteQuery {
    #[serde(default)]
    pub force: bool,
}

async fn delete_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> Result<(), ApiError> {
    let id = InstanceId(id);
    let _guard = state.lock_for(&id).lock_owned().await;
    let mut instance = state
        .registry
        .get_instance(&id)
        .await?
        .ok_or_else(|| ClusterError::not_found(format!("instance {id}")))?;

    if let Some(node_id) = instance.node_id.clone() {
        if let Some(node) = state.registry.get_node(&node_id).await? {
            state.agents.delete_instance(&node, &id, q.force).await?;
        }
    }
    instance.transition(fleetd_core::InstanceState::Deleted, None)?;
    state.registry.put_instance(&instance).await?;
    Ok(())
}

async fn lifecycle_call<F, Fut>(state: &AppState, id: &InstanceId, call: F) -> Result<Instance, ApiError>
where
    F: FnOnce(crate::agent_client::AgentClient, fleetd_core::Node, InstanceId) -> Fut,
    Fut: std::future::Future<Output = fleetd_core::ClusterResult<Instance>>,
{
    let _guard = state.lock_for(id).lock_owned().await;
    let instance = state
        .registry
        .get_instance(id)
        .await?
        .ok_or_else(|| ClusterError::not_found(format!("instance {id}")))?;
    let node_id = instance
        .node_id
        .clone()
        .ok_or_else(|| ClusterError::failed_precondition(format!("instance {id} has no assigned node")))?;
    let node = state
        .registry
        .get_node(&node_id)
        .await?
        .ok_or_else(|| ClusterError::not_found(format!("node {node_id}")))?;
    let mut refreshed = call(state.agents.clone(), node, id.clone()).await?;
    refreshed.node_id = Some(node_id);
    state.registry.put_instance(&refreshed).await?;
    Ok(refreshed)
}

async fn start_instance(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Instance>, ApiError> {
    let id = InstanceId(id);
    let instance = lifecycle_call(&state, &id, |agents, node, id| async move {
        agents.start_instance(&node, &id).await
    })
    .await?;
    Ok(Json(instance))
}

#[derive(Debug, Deserialize, Default)]
pub struct StopRequest {
    #[serde(default)]
    pub force: bool,
}

async fn stop_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StopRequest>>,
) -> Result<Json<Instance>, ApiError> {
    let id = InstanceId(id);
    let force = body.map(|b| b.0.force).unwrap_or(false);
    let instance = lifecycle_call(&state, &id, move |agents, node, id| async move {
        agents.stop_instance(&node, &id, force).await
    })
    .await?;
    Ok(Json(instance))
}

async fn restart_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StopRequest>>,
) -> Result<Json<Instance>, ApiError> {
    let id = InstanceId(id);
    let force = body.map(|b| b.0.force).unwrap_or(false);
    let instance = lifecycle_call(&state, &id, move |agents, node, id| async move {
        agents.restart_instance(&node, &id, force).await
    })
    .await?;
    Ok(Json(instance))
}

async fn instance_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceStatsResponse>, ApiError> {
    let id = InstanceId(id);
    let instance = state
        .registry
        .get_instance(&id)
        .await?
        .ok_or_else(|| ClusterError::not_found(format!("instance {id}")))?;
    let node_id = instance
        .node_id
        .ok_or_else(|| ClusterError::failed_precondition(format!("instance {id} has no assigned node")))?;
    let node = state
        .registry
        .get_node(&node_id)
        .await?
        .ok_or_else(|| ClusterError::not_found(format!("node {node_id}")))?;
    let stats = state.agents.instance_stats(&node, &id).await?;
    Ok(Json(stats))
}

async fn watch_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    Sse::new(single_instance_event_stream(state.registry.clone(), InstanceId(id))).keep_alive(KeepAlive::default())
}
