//! Shared application state for the orchestrator's REST surface (§4.I.1).

use std::sync::Arc;

use dashmap::DashMap;
use fleetd_core::{ClusterResult, InstanceId};
use fleetd_heartbeat::HeartbeatMonitor;
use fleetd_ipam::Ipam;
use fleetd_registry::Registry;
use tokio::sync::Mutex;

use crate::agent_client::AgentClient;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub ipam: Arc<Ipam>,
    pub agents: AgentClient,
    /// Per-instance transition locks (§5): a single queue per instance id so
    /// concurrent RPCs touching the same instance serialize rather than race.
    pub transition_locks: Arc<DashMap<InstanceId, Arc<Mutex<()>>>>,
    /// The in-memory node index and its single watch-dispatch task (§4.C,
    /// §5): node reads go through here rather than hitting the store on
    /// every call.
    pub node_monitor: Arc<HeartbeatMonitor>,
}

impl AppState {
    /// Starts the node monitor's watch-dispatch task before returning, so
    /// every route handler sees a populated index from the first request.
    pub async fn new(registry: Registry, ipam: Arc<Ipam>, agents: AgentClient) -> ClusterResult<Self> {
        let node_monitor = HeartbeatMonitor::new(registry.clone());
        node_monitor.start().await?;
        Ok(Self {
            registry,
            ipam,
            agents,
            transition_locks: Arc::new(DashMap::new()),
            node_monitor,
        })
    }

    /// Returns the per-instance lock, creating it on first use.
    pub fn lock_for(&self, id: &InstanceId) -> Arc<Mutex<()>> {
        self.transition_locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
