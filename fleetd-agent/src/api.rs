//! HTTP/JSON RPC surface mirroring the driver contract (§4.H, §4.H.1):
//! one route per op, a shared `AppState`, and `StatusCode` mapped from the
//! canonical error taxonomy instead of string-sniffing an error message.

use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use fleetd_core::instance::{Instance, InstanceType};
use fleetd_core::{ClusterError, ErrorKind, InstanceId, InstanceSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/instances", post(create_instance).get(list_instances))
        .route(
            "/instances/:id",
            get(get_instance).delete(delete_instance),
        )
        .route("/instances/:id/start", post(start_instance))
        .route("/instances/:id/stop", post(stop_instance))
        .route("/instances/:id/restart", post(restart_instance))
        .route("/instances/:id/stats", get(instance_stats))
        .route("/instances/:id/console", get(crate::console::attach_console))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy", "timestamp": chrono::Utc::now()}))
}

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub instance_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    pub spec: InstanceSpec,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

async fn create_instance(
    State(state): State<AppState>,
    Json(req): Json<CreateInstanceRequest>,
) -> Result<Json<Instance>, ApiError> {
    let id = req
        .instance_id
        .map(InstanceId)
        .unwrap_or_else(|| state.registry.create_instance_id());
    info!(instance_id = %id, "creating instance");

    let mut instance = state
        .driver
        .create(id.clone(), req.name, req.instance_type, req.spec)
        .await
        .map_err(ClusterError::from)?;
    instance.node_id = Some(state.node_id.clone());
    instance.metadata = req.metadata;
    state.registry.put_instance(&instance).await?;
    Ok(Json(instance))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub force: bool,
}

async fn delete_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    let id = InstanceId(id);
    state
        .driver
        .stop(&id, q.force)
        .await
        .map_err(ClusterError::from)
        .ok();
    state.driver.delete(&id).await.map_err(ClusterError::from)?;
    state.registry.delete_instance(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let instance = state.driver.get(&InstanceId(id)).await.map_err(ClusterError::from)?;
    Ok(Json(instance))
}

async fn list_instances(State(state): State<AppState>) -> Result<Json<Vec<Instance>>, ApiError> {
    let instances = state.driver.list().await.map_err(ClusterError::from)?;
    Ok(Json(instances))
}

#[derive(Debug, Serialize)]
pub struct InstanceStatsResponse {
    pub cpu_usage_percent: f64,
    pub memory_bytes_used: u64,
    pub disk_bytes_used: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

async fn instance_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceStatsResponse>, ApiError> {
    let stats = state
        .driver
        .stats(&InstanceId(id))
        .await
        .map_err(ClusterError::from)?;
    Ok(Json(InstanceStatsResponse {
        cpu_usage_percent: stats.cpu_usage_percent,
        memory_bytes_used: stats.memory_bytes_used,
        disk_bytes_used: stats.disk_bytes_used,
        network_rx_bytes: stats.network_rx_bytes,
        network_tx_bytes: stats.network_tx_bytes,
    }))
}

async fn start_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let id = InstanceId(id);
    state.driver.start(&id).await.map_err(ClusterError::from)?;
    refresh_and_persist(&state, &id).await
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
    state.driver.stop(&id, force).await.map_err(ClusterError::from)?;
    refresh_and_persist(&state, &id).await
}

async fn restart_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StopRequest>>,
) -> Result<Json<Instance>, ApiError> {
    let id = InstanceId(id);
    let force = body.map(|b| b.0.force).unwrap_or(false);
    state
        .driver
        .restart(&id, force)
        .await
        .map_err(ClusterError::from)?;
    refresh_and_persist(&state, &id).await
}

/// After every lifecycle call, refresh the affected entry from driver reality
/// and write it back to `/instances/<id>` so orchestrator watchers observe
/// the transition (§4.H).
async fn refresh_and_persist(state: &AppState, id: &InstanceId) -> Result<Json<Instance>, ApiError> {
    let mut instance = state.driver.get(id).await.map_err(ClusterError::from)?;
    instance.node_id = Some(state.node_id.clone());
    state.registry.put_instance(&instance).await?;
    Ok(Json(instance))
}

pub struct ApiError(ClusterError);

impl From<ClusterError> for ApiError {
    fn from(e: ClusterError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ErrorKind::ResourceExhausted => StatusCode::INSUFFICIENT_STORAGE,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(error = %self.0, "agent request failed");
        (
            status,
            Json(serde_json::json!({
                "error": self.0.to_string(),
                "code": self.0.kind().canonical_name(),
            })),
        )
            .into_response()
    }
}
