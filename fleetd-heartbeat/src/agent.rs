//! Agent-side heartbeat: registers the node, then refreshes its lease-backed
//! key on an interval with the current status/allocated/conditions snapshot
//! (§4.C agent side).

use fleetd_core::node::{NodeCondition, NodeStatus, Resources};
use fleetd_core::{ClusterResult, Node};
use fleetd_registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// The mutable slice of a [`Node`] a heartbeat tick refreshes: `status`,
/// `allocated`, `conditions`, `last_seen`.
#[derive(Debug, Clone)]
pub struct HeartbeatPayload {
    pub status: NodeStatus,
    pub allocated: Resources,
    pub conditions: Vec<NodeCondition>,
}

pub struct AgentHeartbeat {
    registry: Registry,
    node: RwLock<Node>,
    interval: Duration,
    lease_ttl: Duration,
}

impl AgentHeartbeat {
    /// `lease_ttl` should be `3 × interval` per §4.C unless the caller has an
    /// explicit override from configuration.
    pub fn new(registry: Registry, node: Node, interval: Duration, lease_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry,
            node: RwLock::new(node),
            interval,
            lease_ttl,
        })
    }

    /// Registers the node for the first time (a plain, non-TTL put — the
    /// node only starts expiring once the refresh loop begins TTL-writing
    /// it), returning the accepted `heartbeat_interval_seconds`.
    pub async fn register(&self) -> ClusterResult<u64> {
        let node = self.node.read().await.clone();
        self.registry.put_node(&node).await?;
        Ok(self.interval.as_secs())
    }

    /// Applies one heartbeat payload immediately and refreshes the lease.
    pub async fn tick(&self, payload: HeartbeatPayload) -> ClusterResult<()> {
        let mut node = self.node.write().await;
        node.status = payload.status;
        node.allocated = payload.allocated;
        node.conditions = payload.conditions;
        node.last_seen = chrono::Utc::now();
        node.check_invariant()?;
        self.registry
            .heartbeat_node(&node, self.lease_ttl.as_secs())
            .await
    }

    /// Spawns the refresh loop. `sample` is called once per tick to produce
    /// the payload (the agent supplies current driver-derived stats here).
    pub fn spawn<F>(self: Arc<Self>, mut sample: F)
    where
        F: FnMut() -> HeartbeatPayload + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                let payload = sample();
                if let Err(e) = self.tick(payload).await {
                    tracing::warn!(error = %e, "heartbeat refresh failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetd_core::node::{NodeRole, Resources};
    use fleetd_core::NodeId;
    use fleetd_store::LocalStore;
    use std::collections::HashSet;

    fn sample_node() -> Node {
        Node {
            schema_version: 1,
            id: NodeId("n1".into()),
            hostname: "h".into(),
            ip: "10.0.0.1".into(),
            port: 7100,
            role: NodeRole::Worker,
            status: NodeStatus::Pending,
            region: "r1".into(),
            zone: "z1".into(),
            capacity: Resources {
                cpu_cores: 16,
                memory_bytes: 64,
                disk_bytes: 500,
                gpu_count: 0,
            },
            allocatable: Resources {
                cpu_cores: 16,
                memory_bytes: 64,
                disk_bytes: 500,
                gpu_count: 0,
            },
            allocated: Resources::default(),
            supported_instance_types: HashSet::new(),
            conditions: vec![],
            created_at: chrono::Utc::now(),
            last_seen: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn register_then_tick_updates_store() {
        let registry = Registry::new(LocalStore::new());
        let hb = AgentHeartbeat::new(
            registry.clone(),
            sample_node(),
            Duration::from_secs(10),
            Duration::from_secs(30),
        );
        let interval = hb.register().await.unwrap();
        assert_eq!(interval, 10);

        hb.tick(HeartbeatPayload {
            status: NodeStatus::Ready,
            allocated: Resources {
                cpu_cores: 4,
                ..Default::default()
            },
            conditions: vec![],
        })
        .await
        .unwrap();

        let stored = registry.get_node(&NodeId("n1".into())).await.unwrap().unwrap();
        assert_eq!(stored.status, NodeStatus::Ready);
        assert_eq!(stored.allocated.cpu_cores, 4);
    }
}
