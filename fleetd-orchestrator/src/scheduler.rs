//! Placement scheduling for `CreateInstance` (§4.I): candidate filtering,
//! most-free-resources tie-break, optimistic compare-and-swap reservation on
//! the chosen node, and an RPC call-out to that node's agent with rollback
//! on failure.

use std::collections::HashMap;

use fleetd_core::instance::{Instance, InstanceState, InstanceType};
use fleetd_core::node::{Node, Resources};
use fleetd_core::{ClusterError, ClusterResult, InstanceId, InstanceSpec};
use fleetd_registry::Registry;
use tracing::{info, warn};

use crate::agent_client::AgentClient;

const MAX_SCHEDULE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct PlacementFilter {
    pub preferred_node_id: Option<String>,
    pub region: Option<String>,
    pub zone: Option<String>,
}

fn candidates(nodes: &[Node], instance_type: InstanceType, required: &Resources, filter: &PlacementFilter) -> Vec<Node> {
    nodes
        .iter()
        .filter(|n| n.is_ready())
        .filter(|n| n.supported_instance_types.contains(&instance_type))
        .filter(|n| required.fits_within(&n.free()))
        .filter(|n| filter.preferred_node_id.as_deref().map(|id| n.id.0 == id).unwrap_or(true))
        .filter(|n| filter.region.as_deref().map(|r| n.region == r).unwrap_or(true))
        .filter(|n| filter.zone.as_deref().map(|z| n.zone == z).unwrap_or(true))
        .cloned()
        .collect()
}

/// Most free CPU, then most free memory, then lowest node id (§4.I step 3).
fn pick_best(mut candidates: Vec<Node>) -> Option<Node> {
    candidates.sort_by(|a, b| {
        let fa = a.free();
        let fb = b.free();
        fb.cpu_cores
            .cmp(&fa.cpu_cores)
            .then(fb.memory_bytes.cmp(&fa.memory_bytes))
            .then(a.id.0.cmp(&b.id.0))
    });
    candidates.into_iter().next()
}

/// Runs the full §4.I scheduling algorithm for an already-persisted
/// `pending` instance, mutating it in place to `creating`+`node_id` on
/// success or `failed` on exhaustion/RPC failure.
pub async fn schedule(
    registry: &Registry,
    agents: &AgentClient,
    instance: &mut Instance,
    filter: &PlacementFilter,
) -> ClusterResult<()> {
    let required = instance.spec.required_resources();

    for attempt in 0..MAX_SCHEDULE_ATTEMPTS {
        let nodes = registry.list_nodes().await?;
        let pool = candidates(&nodes, instance.instance_type, &required, filter);
        let chosen = match pick_best(pool) {
            Some(n) => n,
            None => {
                return fail(registry, instance, "no candidate node has enough free resources").await;
            }
        };

        let mut reserved = chosen.clone();
        reserved.allocated = reserved
            .allocated
            .checked_add(&required)
            .ok_or_else(|| ClusterError::internal("resource accounting overflow"))?;

        match registry.compare_and_swap_node(&chosen, &reserved).await {
            Ok(true) => {
                info!(node_id = %chosen.id, instance_id = %instance.id, attempt, "reserved node for instance");
                return dispatch(registry, agents, instance, chosen, reserved).await;
            }
            Ok(false) => {
                warn!(node_id = %chosen.id, attempt, "lost reservation race, retrying");
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    fail(registry, instance, "unschedulable: exhausted reservation attempts").await
}

async fn dispatch(
    registry: &Registry,
    agents: &AgentClient,
    instance: &mut Instance,
    chosen: Node,
    reserved: Node,
) -> ClusterResult<()> {
    match agents
        .create_instance(
            &chosen,
            &instance.id,
            &instance.name,
            instance.instance_type,
            &instance.spec,
            &instance.metadata,
        )
        .await
    {
        Ok(agent_instance) => {
            instance.node_id = Some(chosen.id.clone());
            instance.transition(InstanceState::Creating, None)?;
            instance.ip_address = agent_instance.ip_address;
            registry.put_instance(instance).await?;
            Ok(())
        }
        Err(e) => {
            warn!(node_id = %chosen.id, error = %e, "agent create_instance failed, rolling back reservation");
            let _ = registry.compare_and_swap_node(&reserved, &chosen).await;
            fail(registry, instance, format!("agent dispatch failed: {e}")).await
        }
    }
}

async fn fail(registry: &Registry, instance: &mut Instance, reason: impl Into<String>) -> ClusterResult<()> {
    let reason = reason.into();
    warn!(instance_id = %instance.id, reason = %reason, "scheduling failed");
    instance
        .transition(InstanceState::Failed, Some(reason))
        .ok();
    registry.put_instance(instance).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetd_core::instance::{DiskSpec, InstanceType};
    use fleetd_core::node::{NodeRole, NodeStatus};
    use fleetd_core::NodeId;
    use fleetd_store::LocalStore;
    use std::collections::HashSet;

    fn node(id: &str, cpu: u32, mem: u64) -> Node {
        Node {
            schema_version: 1,
            id: NodeId(id.to_string()),
            hostname: id.to_string(),
            ip: "127.0.0.1".into(),
            port: 7100,
            role: NodeRole::Worker,
            status: NodeStatus::Ready,
            region: "r1".into(),
            zone: "z1".into(),
            capacity: Resources { cpu_cores: cpu, memory_bytes: mem, disk_bytes: 500, gpu_count: 0 },
            allocatable: Resources { cpu_cores: cpu, memory_bytes: mem, disk_bytes: 500, gpu_count: 0 },
            allocated: Resources::default(),
            supported_instance_types: HashSet::from([InstanceType::Container]),
            conditions: vec![],
            created_at: chrono::Utc::now(),
            last_seen: chrono::Utc::now(),
        }
    }

    fn spec(cpu: u32, mem: u64) -> InstanceSpec {
        InstanceSpec {
            image_ref: "alpine".into(),
            cpu_cores: cpu,
            memory_bytes: mem,
            disks: vec![DiskSpec { size_bytes: 0, source_image: None }],
            command: vec![],
            env: HashMap::new(),
            kernel: None,
            initrd: None,
            network: None,
            limits: Resources::default(),
        }
    }

    #[test]
    fn picks_node_with_most_free_cpu() {
        let nodes = vec![node("a", 4, 64), node("b", 16, 64)];
        let pool = candidates(&nodes, InstanceType::Container, &Resources { cpu_cores: 1, memory_bytes: 1, disk_bytes: 0, gpu_count: 0 }, &PlacementFilter::default());
        let best = pick_best(pool).unwrap();
        assert_eq!(best.id.0, "b");
    }

    #[test]
    fn ties_break_by_node_id() {
        let nodes = vec![node("z", 8, 64), node("a", 8, 64)];
        let pool = candidates(&nodes, InstanceType::Container, &Resources { cpu_cores: 1, memory_bytes: 1, disk_bytes: 0, gpu_count: 0 }, &PlacementFilter::default());
        let best = pick_best(pool).unwrap();
        assert_eq!(best.id.0, "a");
    }

    #[test]
    fn excludes_nodes_without_enough_free_resources() {
        let nodes = vec![node("a", 2, 4)];
        let pool = candidates(&nodes, InstanceType::Container, &Resources { cpu_cores: 8, memory_bytes: 8, disk_bytes: 0, gpu_count: 0 }, &PlacementFilter::default());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn schedule_fails_closed_when_no_nodes_registered() {
        let registry = Registry::new(LocalStore::new());
        let agents = AgentClient::new(std::time::Duration::from_secs(1)).unwrap();
        let mut instance = Instance {
            schema_version: 1,
            id: InstanceId("i1".into()),
            name: "i1".into(),
            instance_type: InstanceType::Container,
            state: InstanceState::Pending,
            spec: spec(1, 1),
            node_id: None,
            ip_address: None,
            metadata: HashMap::new(),
            state_reason: None,
            created_at: chrono::Utc::now(),
            started_at: None,
        };
        schedule(&registry, &agents, &mut instance, &PlacementFilter::default())
            .await
            .unwrap();
        assert_eq!(instance.state, InstanceState::Failed);
    }
}
