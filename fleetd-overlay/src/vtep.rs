//! VTEP lifecycle manager (§4.F): publishes and refreshes this node's VTEP,
//! and reacts to remote VTEP churn by establishing or tearing down tunnels
//! through the VXLAN manager.

use crate::vxlan::VxlanManager;
use fleetd_core::network::{Vtep, VtepStatus};
use fleetd_core::{ClusterResult, NodeId};
use fleetd_registry::{EventKind, Registry};
use fleetd_store::ReconnectBackoff;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_stream::StreamExt;

pub struct VtepManager {
    registry: Registry,
    vxlan: Arc<VxlanManager>,
    node_id: NodeId,
    local: RwLock<Vtep>,
    ttl_seconds: u64,
    refresh_interval: Duration,
    /// Known remote VTEPs, used to detect IP changes vs genuinely-new remotes.
    known_remotes: dashmap::DashMap<NodeId, Vtep>,
}

impl VtepManager {
    pub fn new(
        registry: Registry,
        vxlan: Arc<VxlanManager>,
        node_id: NodeId,
        ip: IpAddr,
        port: u16,
        interface: impl Into<String>,
        ttl_seconds: u64,
        refresh_interval: Duration,
    ) -> Arc<Self> {
        let local = Vtep {
            schema_version: 1,
            node_id: node_id.clone(),
            ip,
            port,
            interface: interface.into(),
            status: VtepStatus::Active,
            updated_at: chrono::Utc::now(),
        };
        Arc::new(Self {
            registry,
            vxlan,
            node_id,
            local: RwLock::new(local),
            ttl_seconds,
            refresh_interval,
            known_remotes: dashmap::DashMap::new(),
        })
    }

    /// Publishes the local VTEP, starts the refresh task, and spawns the
    /// watcher over the VTEP prefix (§4.F).
    pub async fn start(self: &Arc<Self>) -> ClusterResult<()> {
        self.publish().await?;

        let refresher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresher.refresh_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = refresher.publish().await {
                    tracing::warn!(error = %e, "vtep refresh failed");
                }
            }
        });

        // Fails fast if the store can't be watched at all; reconnect backoff
        // only governs retries after an initial successful subscribe.
        self.registry.watch_vteps().await?;
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = ReconnectBackoff::new();
            loop {
                match watcher.registry.watch_vteps().await {
                    Ok(mut stream) => {
                        backoff.reset();
                        while let Some(ev) = stream.next().await {
                            watcher.handle_event(ev).await;
                        }
                        tracing::warn!("vtep watch stream ended, reconnecting");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "vtep watch subscribe failed, retrying");
                    }
                }
                tokio::time::sleep(backoff.next_delay()).await;
            }
        });
        Ok(())
    }

    async fn publish(&self) -> ClusterResult<()> {
        let mut vtep = self.local.write().await;
        vtep.updated_at = chrono::Utc::now();
        self.registry
            .put_vtep_with_ttl(&vtep, self.ttl_seconds)
            .await
    }

    async fn handle_event(&self, ev: fleetd_registry::EntityEvent<Vtep>) {
        let remote_id = match &ev.value {
            Some(v) => v.node_id.clone(),
            None => match &ev.previous {
                Some(v) => v.node_id.clone(),
                None => return,
            },
        };
        if remote_id == self.node_id {
            return;
        }

        match ev.kind {
            EventKind::Added => {
                if let Some(v) = ev.value {
                    self.known_remotes.insert(remote_id.clone(), v.clone());
                    if let Err(e) = self.establish_mesh_with(&remote_id, v.ip).await {
                        tracing::warn!(error = %e, remote = %remote_id, "failed establishing mesh with new remote");
                    }
                }
            }
            EventKind::Modified => {
                if let Some(v) = ev.value {
                    let ip_changed = ev.previous.as_ref().map(|p| p.ip) != Some(v.ip);
                    self.known_remotes.insert(remote_id.clone(), v.clone());
                    if ip_changed {
                        self.vxlan.teardown_all_for_remote(&remote_id);
                        if let Err(e) = self.establish_mesh_with(&remote_id, v.ip).await {
                            tracing::warn!(error = %e, remote = %remote_id, "failed re-establishing mesh after ip change");
                        }
                    }
                }
            }
            EventKind::Deleted => {
                self.known_remotes.remove(&remote_id);
                self.vxlan.teardown_all_for_remote(&remote_id);
            }
        }
    }

    async fn establish_mesh_with(&self, remote_id: &NodeId, remote_ip: IpAddr) -> ClusterResult<()> {
        for vni in self.vxlan.vnis_of_known_networks() {
            self.vxlan
                .create_tunnel(remote_id.clone(), remote_ip, vni)
                .await?;
        }
        Ok(())
    }

    /// Establishes tunnels to every currently known remote for `vni`;
    /// partial failures are surfaced as the last error but do not abort the
    /// overall mesh operation (§4.F).
    pub async fn establish_mesh(&self, vni: u32) -> ClusterResult<()> {
        let mut last_err = None;
        for entry in self.known_remotes.iter() {
            let (remote_id, vtep) = (entry.key().clone(), entry.value().clone());
            if let Err(e) = self.vxlan.create_tunnel(remote_id, vtep.ip, vni).await {
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn teardown_mesh(&self, vni: u32) {
        for entry in self.known_remotes.iter() {
            self.vxlan.teardown_tunnel(entry.key(), vni);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::RecordingBridgeControl;
    use fleetd_core::network::{Network, NetworkStatus, NetworkType};
    use fleetd_store::LocalStore;

    fn vxlan() -> Arc<VxlanManager> {
        Arc::new(VxlanManager::new(
            Arc::new(RecordingBridgeControl::new()),
            NodeId("n1".into()),
            "10.1.0.1".parse().unwrap(),
        ))
    }

    #[tokio::test]
    async fn start_publishes_local_vtep() {
        let registry = Registry::new(LocalStore::new());
        let mgr = VtepManager::new(
            registry.clone(),
            vxlan(),
            NodeId("n1".into()),
            "10.1.0.1".parse().unwrap(),
            4789,
            "vtep0",
            30,
            Duration::from_secs(10),
        );
        mgr.start().await.unwrap();
        let stored = registry.get_vtep(&NodeId("n1".into())).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn remote_put_establishes_tunnel_for_registered_network() {
        let registry = Registry::new(LocalStore::new());
        let vxlan_mgr = vxlan();
        vxlan_mgr
            .register_network(Network {
                schema_version: 1,
                id: "net1".into(),
                name: "net1".into(),
                network_type: NetworkType::Vxlan,
                vni: 100,
                vlan_id: None,
                mtu: 1450,
                status: NetworkStatus::Active,
                subnet_ids: vec![],
                created_at: chrono::Utc::now(),
            })
            .unwrap();

        let mgr = VtepManager::new(
            registry.clone(),
            vxlan_mgr.clone(),
            NodeId("n1".into()),
            "10.1.0.1".parse().unwrap(),
            4789,
            "vtep0",
            30,
            Duration::from_secs(10),
        );
        mgr.start().await.unwrap();

        registry
            .put_vtep_with_ttl(
                &Vtep {
                    schema_version: 1,
                    node_id: NodeId("n2".into()),
                    ip: "10.1.0.2".parse().unwrap(),
                    port: 4789,
                    interface: "vtep0".into(),
                    status: VtepStatus::Active,
                    updated_at: chrono::Utc::now(),
                },
                30,
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(vxlan_mgr.list_tunnels().len(), 1);
    }
}
