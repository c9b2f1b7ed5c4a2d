//! Server-side heartbeat monitor: watches `/nodes/` and maintains an
//! in-memory `{id → Node}` index, fanning out typed events to subscribers
//! (§4.C server side).
//!
//! A `DashMap`-backed index, a dispatch loop driven by a single background
//! task, and a manual `Clone` impl so `Arc::new(self.clone())` can be handed
//! to `tokio::spawn` while the monitor itself is held by value elsewhere.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleetd_core::node::NodeStatus;
use fleetd_core::{ClusterResult, Node, NodeId};
use fleetd_registry::{EventKind, Registry};
use fleetd_store::ReconnectBackoff;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub node_id: NodeId,
    /// The node's last-known state. For `Deleted` (the store entry is gone,
    /// including on TTL expiry) this is the node as marked `not_ready`, since
    /// the index retains it rather than evicting it; `None` only if the node
    /// was never seen in the index before its delete event arrived.
    pub node: Option<Node>,
    pub ts: DateTime<Utc>,
}

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct HeartbeatMonitor {
    registry: Registry,
    index: DashMap<NodeId, Node>,
    events: broadcast::Sender<NodeEvent>,
}

impl Clone for HeartbeatMonitor {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            index: self.index.clone(),
            events: self.events.clone(),
        }
    }
}

impl HeartbeatMonitor {
    pub fn new(registry: Registry) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            registry,
            index: DashMap::new(),
            events,
        })
    }

    /// Spawns the single watch-dispatch task for the `/nodes/` prefix. Per
    /// §5's locking discipline, the in-memory index is only ever written
    /// from this one task. On stream termination it re-lists and
    /// re-subscribes after an exponential backoff (§4.A), rather than
    /// leaving the index to go stale forever.
    pub async fn start(self: &Arc<Self>) -> ClusterResult<()> {
        // Fails fast if the store can't be watched at all; reconnect backoff
        // only governs retries after an initial successful subscribe.
        self.registry.watch_nodes().await?;
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = ReconnectBackoff::new();
            loop {
                match monitor.registry.watch_nodes().await {
                    Ok(mut stream) => {
                        backoff.reset();
                        while let Some(ev) = stream.next().await {
                            monitor.dispatch(ev);
                        }
                        tracing::warn!("node watch stream ended, reconnecting");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "node watch subscribe failed, retrying");
                    }
                }
                tokio::time::sleep(backoff.next_delay()).await;
            }
        });
        Ok(())
    }

    fn dispatch(&self, ev: fleetd_registry::EntityEvent<Node>) {
        let (kind, node_id, node) = match ev.kind {
            EventKind::Added => (
                NodeEventKind::Added,
                ev.value.as_ref().map(|n| n.id.clone()),
                ev.value.clone(),
            ),
            EventKind::Modified => (
                NodeEventKind::Modified,
                ev.value.as_ref().map(|n| n.id.clone()),
                ev.value.clone(),
            ),
            EventKind::Deleted => (
                NodeEventKind::Deleted,
                ev.previous.as_ref().map(|n| n.id.clone()),
                None,
            ),
        };
        let Some(node_id) = node_id else { return };

        let emitted_node = match kind {
            NodeEventKind::Added | NodeEventKind::Modified => {
                if let Some(ref n) = node {
                    self.index.insert(node_id.clone(), n.clone());
                }
                node
            }
            NodeEventKind::Deleted => {
                let marked = self.mark_not_ready(&node_id);
                tracing::info!(node_id = %node_id, "node lease expired, marked not_ready");
                marked
            }
        };

        let _ = self.events.send(NodeEvent {
            kind,
            node_id,
            node: emitted_node,
            ts: Utc::now(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub fn get_node(&self, id: &NodeId) -> Option<Node> {
        self.index.get(id).map(|e| e.value().clone())
    }

    pub fn list_nodes(&self) -> Vec<Node> {
        self.index.iter().map(|e| e.value().clone()).collect()
    }

    /// Returns the node after marking it `not_ready`, used when a watcher
    /// observes staleness outside of an explicit delete (e.g. reconciliation
    /// cooldown in §4.I).
    pub fn mark_not_ready(&self, id: &NodeId) -> Option<Node> {
        if let Some(mut entry) = self.index.get_mut(id) {
            entry.status = NodeStatus::NotReady;
            return Some(entry.clone());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetd_core::node::{NodeRole, Resources};
    use fleetd_store::LocalStore;
    use std::collections::HashSet;
    use std::time::Duration;

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
    async fn added_then_modified_update_the_index() {
        let store = LocalStore::new();
        let registry = Registry::new(store);
        registry.put_node(&sample_node("n1")).await.unwrap();

        let monitor = HeartbeatMonitor::new(registry.clone());
        let mut rx = monitor.subscribe();
        monitor.start().await.unwrap();

        let added = rx.recv().await.unwrap();
        assert_eq!(added.kind, NodeEventKind::Added);
        assert!(monitor.get_node(&NodeId("n1".into())).is_some());

        let mut updated = sample_node("n1");
        updated.status = NodeStatus::NotReady;
        registry.put_node(&updated).await.unwrap();

        let modified = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(modified.kind, NodeEventKind::Modified);
        assert_eq!(
            monitor.get_node(&NodeId("n1".into())).unwrap().status,
            NodeStatus::NotReady
        );
    }

    #[tokio::test]
    async fn lease_expiry_marks_not_ready_instead_of_removing() {
        let store = LocalStore::with_sweep_interval(Duration::from_millis(20));
        let registry = Registry::new(store);
        registry
            .heartbeat_node(&sample_node("n1"), 0)
            .await
            .unwrap();

        let monitor = HeartbeatMonitor::new(registry.clone());
        let mut rx = monitor.subscribe();
        monitor.start().await.unwrap();

        let added = rx.recv().await.unwrap();
        assert_eq!(added.kind, NodeEventKind::Added);

        let deleted = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deleted.kind, NodeEventKind::Deleted);
        let retained = monitor.get_node(&NodeId("n1".into())).unwrap();
        assert_eq!(retained.status, NodeStatus::NotReady);
    }
}
