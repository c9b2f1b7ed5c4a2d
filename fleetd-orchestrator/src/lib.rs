//! Central control plane service (§4.I): accepts user intent, schedules
//! placement over ready nodes, delegates to the owning agent, and streams
//! cluster/instance state to watchers.

pub mod agent_client;
pub mod api_error;
pub mod cluster;
pub mod compute;
pub mod console_proxy;
pub mod network;
pub mod scheduler;
pub mod state;
pub mod watch;

pub use state::AppState;

use axum::Router;

/// Merges the three service routers under one `axum::Router` (§4.I.1).
pub fn router(state: AppState) -> Router {
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    Router::new()
        .merge(cluster::router(state.clone()))
        .merge(compute::router(state.clone()))
        .merge(network::router(state.clone()))
        .route(
            "/compute/instances/:id/console",
            axum::routing::get(console_proxy::attach_console),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
