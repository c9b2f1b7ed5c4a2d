//! Shared application state for the agent's HTTP/JSON RPC surface (§4.H.1).

use fleetd_core::NodeId;
use fleetd_driver::ComputeDriver;
use fleetd_registry::Registry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub driver: Arc<dyn ComputeDriver>,
    pub registry: Registry,
    pub node_id: NodeId,
}
