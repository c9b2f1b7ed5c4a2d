//! Typed CRUD for nodes and instances on top of the coordination store (§4.B).
//!
//! Owns the key layout (`keys.rs`) and translates raw watch events into the
//! typed `Added`/`Modified`/`Deleted` deltas consumers need (`watch.rs`).

pub mod keys;
pub mod watch;

use chrono::Utc;
use fleetd_core::network::{IpAllocation, Network, Subnet, Vtep};
use fleetd_core::{ClusterError, ClusterResult, Instance, InstanceId, Node, NodeId};
use fleetd_store::CoordinationStore;
use std::sync::Arc;
use uuid::Uuid;

pub use watch::{EntityEvent, EntityStream, EventKind};

#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn CoordinationStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Time-sorted unique identifier: a millisecond timestamp in fixed-width
    /// hex (so lexicographic order matches creation order) plus a random
    /// suffix for intra-millisecond uniqueness.
    pub fn create_instance_id(&self) -> InstanceId {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        InstanceId(format!("{millis:016x}-{}", Uuid::new_v4().simple()))
    }

    // ---- Nodes ----------------------------------------------------------

    /// Idempotent under retry: writing the same id with identical content is
    /// a no-op observationally (same bytes land in the store again).
    pub async fn put_node(&self, node: &Node) -> ClusterResult<()> {
        let bytes = serde_json::to_vec(node)
            .map_err(|e| ClusterError::internal(format!("encode node: {e}")))?;
        self.store.put(&keys::node_key(&node.id), bytes).await
    }

    /// Refreshes the node with a TTL, per §4.C's lease-backed heartbeat key.
    pub async fn heartbeat_node(&self, node: &Node, ttl_seconds: u64) -> ClusterResult<()> {
        let bytes = serde_json::to_vec(node)
            .map_err(|e| ClusterError::internal(format!("encode node: {e}")))?;
        self.store
            .put_with_ttl(&keys::node_key(&node.id), bytes, ttl_seconds)
            .await
    }

    pub async fn get_node(&self, id: &NodeId) -> ClusterResult<Option<Node>> {
        match self.store.get(&keys::node_key(id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn list_nodes(&self) -> ClusterResult<Vec<Node>> {
        let raw = self.store.list_prefix(keys::NODES_PREFIX).await?;
        raw.iter().map(|(_, v)| decode(v)).collect()
    }

    pub async fn delete_node(&self, id: &NodeId) -> ClusterResult<()> {
        self.store.delete(&keys::node_key(id)).await
    }

    pub async fn watch_nodes(&self) -> ClusterResult<EntityStream<Node>> {
        let raw = self.store.watch_prefix(keys::NODES_PREFIX).await?;
        Ok(watch::translate(raw))
    }

    /// Installs `updated` only if the node's stored bytes still match
    /// `expected` (§9: "a compare-and-swap on the store entry" for the
    /// scheduler's optimistic `allocated` increment). Callers re-fetch and
    /// retry on a `false` result.
    pub async fn compare_and_swap_node(&self, expected: &Node, updated: &Node) -> ClusterResult<bool> {
        let expected_bytes = serde_json::to_vec(expected)
            .map_err(|e| ClusterError::internal(format!("encode node: {e}")))?;
        let updated_bytes = serde_json::to_vec(updated)
            .map_err(|e| ClusterError::internal(format!("encode node: {e}")))?;
        self.store
            .compare_and_swap(&keys::node_key(&updated.id), Some(expected_bytes), updated_bytes)
            .await
    }

    // ---- Instances --------------------------------------------------------

    pub async fn put_instance(&self, instance: &Instance) -> ClusterResult<()> {
        let bytes = serde_json::to_vec(instance)
            .map_err(|e| ClusterError::internal(format!("encode instance: {e}")))?;
        self.store.put(&keys::instance_key(&instance.id), bytes).await
    }

    pub async fn get_instance(&self, id: &InstanceId) -> ClusterResult<Option<Instance>> {
        match self.store.get(&keys::instance_key(id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn list_instances(&self) -> ClusterResult<Vec<Instance>> {
        let raw = self.store.list_prefix(keys::INSTANCES_PREFIX).await?;
        raw.iter().map(|(_, v)| decode(v)).collect()
    }

    /// Must succeed on missing (idempotent), mirroring the driver contract's
    /// delete semantics (§4.G).
    pub async fn delete_instance(&self, id: &InstanceId) -> ClusterResult<()> {
        self.store.delete(&keys::instance_key(id)).await
    }

    pub async fn watch_instances(&self) -> ClusterResult<EntityStream<Instance>> {
        let raw = self.store.watch_prefix(keys::INSTANCES_PREFIX).await?;
        Ok(watch::translate(raw))
    }

    // ---- Networks / subnets / allocations (§4.D, §4.E) --------------------

    pub async fn put_network(&self, network: &Network) -> ClusterResult<()> {
        let bytes = serde_json::to_vec(network)
            .map_err(|e| ClusterError::internal(format!("encode network: {e}")))?;
        self.store.put(&keys::network_key(&network.id), bytes).await
    }

    pub async fn get_network(&self, id: &str) -> ClusterResult<Option<Network>> {
        match self.store.get(&keys::network_key(id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn list_networks(&self) -> ClusterResult<Vec<Network>> {
        let raw = self.store.list_prefix(keys::NETWORKS_PREFIX).await?;
        raw.iter().map(|(_, v)| decode(v)).collect()
    }

    /// Attempts the compare-and-create used by `register_network` (§4.E) to
    /// reject VNI collisions; callers check the returned bool.
    pub async fn create_network_if_absent(&self, network: &Network) -> ClusterResult<bool> {
        let bytes = serde_json::to_vec(network)
            .map_err(|e| ClusterError::internal(format!("encode network: {e}")))?;
        self.store
            .create_if_absent(&keys::network_key(&network.id), bytes)
            .await
    }

    pub async fn put_subnet(&self, subnet: &Subnet) -> ClusterResult<()> {
        let bytes = serde_json::to_vec(subnet)
            .map_err(|e| ClusterError::internal(format!("encode subnet: {e}")))?;
        self.store.put(&keys::subnet_key(&subnet.id), bytes).await
    }

    pub async fn get_subnet(&self, id: &str) -> ClusterResult<Option<Subnet>> {
        match self.store.get(&keys::subnet_key(id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn list_subnets(&self) -> ClusterResult<Vec<Subnet>> {
        let raw = self.store.list_prefix(keys::SUBNETS_PREFIX).await?;
        raw.iter().map(|(_, v)| decode(v)).collect()
    }

    pub async fn delete_subnet(&self, id: &str) -> ClusterResult<()> {
        self.store.delete(&keys::subnet_key(id)).await
    }

    /// Specific-IP allocation path (§4.D): fails with `false` if the key is
    /// already taken, letting the caller map that to `AlreadyAllocated`.
    pub async fn create_allocation_if_absent(
        &self,
        allocation: &IpAllocation,
    ) -> ClusterResult<bool> {
        let bytes = serde_json::to_vec(allocation)
            .map_err(|e| ClusterError::internal(format!("encode allocation: {e}")))?;
        self.store
            .create_if_absent(
                &keys::allocation_key(&allocation.subnet_id, &allocation.ip_address.to_string()),
                bytes,
            )
            .await
    }

    pub async fn release_allocation(&self, subnet_id: &str, ip: &str) -> ClusterResult<()> {
        self.store.delete(&keys::allocation_key(subnet_id, ip)).await
    }

    pub async fn list_allocations(&self, subnet_id: &str) -> ClusterResult<Vec<IpAllocation>> {
        let raw = self
            .store
            .list_prefix(&keys::allocation_prefix(subnet_id))
            .await?;
        raw.iter().map(|(_, v)| decode(v)).collect()
    }

    // ---- VTEPs (§4.F) -----------------------------------------------------

    /// Lease-backed publish, refreshed by the VTEP manager's refresh task.
    pub async fn put_vtep_with_ttl(&self, vtep: &Vtep, ttl_seconds: u64) -> ClusterResult<()> {
        let bytes = serde_json::to_vec(vtep)
            .map_err(|e| ClusterError::internal(format!("encode vtep: {e}")))?;
        self.store
            .put_with_ttl(&keys::vtep_key(&vtep.node_id), bytes, ttl_seconds)
            .await
    }

    pub async fn get_vtep(&self, node_id: &NodeId) -> ClusterResult<Option<Vtep>> {
        match self.store.get(&keys::vtep_key(node_id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn list_vteps(&self) -> ClusterResult<Vec<Vtep>> {
        let raw = self.store.list_prefix(keys::VTEPS_PREFIX).await?;
        raw.iter().map(|(_, v)| decode(v)).collect()
    }

    pub async fn watch_vteps(&self) -> ClusterResult<EntityStream<Vtep>> {
        let raw = self.store.watch_prefix(keys::VTEPS_PREFIX).await?;
        Ok(watch::translate(raw))
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> ClusterResult<T> {
    serde_json::from_slice(bytes).map_err(|e| ClusterError::internal(format!("decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetd_core::node::{NodeRole, NodeStatus, Resources};
    use fleetd_store::LocalStore;
    use std::collections::HashSet;
    use tokio_stream::StreamExt;

    fn sample_node(id: &str) -> Node {
        Node {
            schema_version: 1,
            id: NodeId(id.to_string()),
            hostname: "h".into(),
            ip: "10.0.0.1".into(),
            port: 7100,
            role: NodeRole::Worker,
            status: NodeStatus::Ready,
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
            created_at: Utc::now(),
            last_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_then_get_node_round_trips() {
        let registry = Registry::new(LocalStore::new());
        let node = sample_node("n1");
        registry.put_node(&node).await.unwrap();
        let fetched = registry.get_node(&node.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, node.id);
    }

    #[tokio::test]
    async fn list_nodes_returns_all_registered() {
        let registry = Registry::new(LocalStore::new());
        registry.put_node(&sample_node("a")).await.unwrap();
        registry.put_node(&sample_node("b")).await.unwrap();
        let nodes = registry.list_nodes().await.unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[tokio::test]
    async fn instance_ids_are_time_sorted() {
        let registry = Registry::new(LocalStore::new());
        let a = registry.create_instance_id();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let b = registry.create_instance_id();
        assert!(a.0 < b.0);
    }

    #[tokio::test]
    async fn delete_instance_is_idempotent() {
        let registry = Registry::new(LocalStore::new());
        let id = InstanceId("inst-1".into());
        registry.delete_instance(&id).await.unwrap();
        registry.delete_instance(&id).await.unwrap();
    }

    #[tokio::test]
    async fn watch_nodes_replays_added_before_live_modified() {
        let registry = Registry::new(LocalStore::new());
        registry.put_node(&sample_node("n1")).await.unwrap();
        let mut stream = registry.watch_nodes().await.unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.kind, EventKind::Added);

        let mut updated = sample_node("n1");
        updated.status = NodeStatus::NotReady;
        registry.put_node(&updated).await.unwrap();

        let second = stream.next().await.unwrap();
        assert_eq!(second.kind, EventKind::Modified);
    }
}
