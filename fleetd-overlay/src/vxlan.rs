//! VXLAN tunnel mesh manager (§4.E): local bridge initialization, per-remote
//! tunnel creation, and the VNI→Network registration index.

use crate::bridge::{BridgeControl, FlowRule};
use dashmap::DashMap;
use fleetd_core::network::{Network, NetworkType, Tunnel, TunnelStatus};
use fleetd_core::{ClusterError, ClusterResult, NodeId};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const INTEGRATION_BRIDGE: &str = "br-int";
pub const TUNNEL_BRIDGE: &str = "br-tun";
const PATCH_INT_TO_TUN: &str = "patch-tun";
const PATCH_TUN_TO_INT: &str = "patch-int";

pub struct VxlanManager {
    bridge: Arc<dyn BridgeControl>,
    node_id: NodeId,
    local_ip: IpAddr,
    /// Keyed by `(remote_node_id, vni)`, per §3 and §4.E.
    tunnels: DashMap<(NodeId, u32), Tunnel>,
    vni_index: DashMap<u32, Network>,
    initialized: AtomicBool,
}

impl VxlanManager {
    pub fn new(bridge: Arc<dyn BridgeControl>, node_id: NodeId, local_ip: IpAddr) -> Self {
        Self {
            bridge,
            node_id,
            local_ip,
            tunnels: DashMap::new(),
            vni_index: DashMap::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Idempotent: ensures both bridges exist, the patch-port pair is
    /// installed, and the base learning/classification flow rules are in
    /// place (§4.E).
    pub async fn initialize(&self) -> ClusterResult<()> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        self.bridge.create_bridge(INTEGRATION_BRIDGE).await?;
        self.bridge.create_bridge(TUNNEL_BRIDGE).await?;
        self.bridge
            .add_port(INTEGRATION_BRIDGE, PATCH_INT_TO_TUN)
            .await?;
        self.bridge
            .add_port(TUNNEL_BRIDGE, PATCH_TUN_TO_INT)
            .await?;

        self.bridge
            .install_flow(
                INTEGRATION_BRIDGE,
                FlowRule {
                    table: 0,
                    matches: "*".into(),
                    actions: "normal".into(),
                },
            )
            .await?;
        self.bridge
            .install_flow(
                TUNNEL_BRIDGE,
                FlowRule {
                    table: 0,
                    matches: format!("in_port={PATCH_TUN_TO_INT}"),
                    actions: "goto_table:2".into(),
                },
            )
            .await?;
        self.bridge
            .install_flow(
                TUNNEL_BRIDGE,
                FlowRule {
                    table: 0,
                    matches: "tun_id=*".into(),
                    actions: "goto_table:1".into(),
                },
            )
            .await?;
        Ok(())
    }

    /// Rejects non-VXLAN types and out-of-range VNIs; rejects a VNI already
    /// bound to a *different* network id (same id is idempotent).
    pub fn register_network(&self, net: Network) -> ClusterResult<()> {
        if net.network_type != NetworkType::Vxlan {
            return Err(ClusterError::invalid_argument(format!(
                "network {} is not a vxlan network",
                net.id
            )));
        }
        if net.vni < fleetd_core::network::VNI_MIN || net.vni > fleetd_core::network::VNI_MAX {
            return Err(ClusterError::invalid_argument(format!(
                "vni {} outside valid range",
                net.vni
            )));
        }
        if let Some(existing) = self.vni_index.get(&net.vni) {
            if existing.id != net.id {
                return Err(ClusterError::already_exists(format!(
                    "vni {} already bound to network {}",
                    net.vni, existing.id
                )));
            }
        }
        self.vni_index.insert(net.vni, net);
        Ok(())
    }

    pub fn network_for_vni(&self, vni: u32) -> Option<Network> {
        self.vni_index.get(&vni).map(|e| e.value().clone())
    }

    pub fn vnis_of_known_networks(&self) -> Vec<u32> {
        self.vni_index.iter().map(|e| *e.key()).collect()
    }

    /// Returns the existing tunnel if present; otherwise adds a VXLAN port
    /// with a deterministic name and installs the tunnel-table forwarding
    /// rule. A flow-install failure is logged but does not fail tunnel
    /// creation — the tunnel remains usable via the base learning rule.
    pub async fn create_tunnel(
        &self,
        remote_node_id: NodeId,
        remote_ip: IpAddr,
        vni: u32,
    ) -> ClusterResult<Tunnel> {
        let key = Tunnel::key(&remote_node_id, vni);
        if let Some(existing) = self.tunnels.get(&key) {
            return Ok(existing.value().clone());
        }

        let short: String = remote_node_id.0.chars().take(8).collect();
        let port_name = format!("vxlan-{short}");
        self.bridge
            .add_vxlan_port(TUNNEL_BRIDGE, &port_name, self.local_ip, remote_ip)
            .await?;

        if let Err(e) = self
            .bridge
            .install_flow(
                TUNNEL_BRIDGE,
                FlowRule {
                    table: 1,
                    matches: format!("tun_id={vni}"),
                    actions: format!("pop_vxlan,output:{PATCH_TUN_TO_INT}"),
                },
            )
            .await
        {
            tracing::warn!(error = %e, vni, "failed to install tunnel flow; tunnel still created");
        }

        let tunnel = Tunnel {
            id: format!("{}-{}", remote_node_id, vni),
            vni,
            local_vtep_id: self.node_id.clone(),
            remote_vtep_id: remote_node_id,
            remote_ip,
            status: TunnelStatus::Up,
        };
        self.tunnels.insert(key, tunnel.clone());
        Ok(tunnel)
    }

    pub fn teardown_tunnel(&self, remote_node_id: &NodeId, vni: u32) {
        self.tunnels.remove(&Tunnel::key(remote_node_id, vni));
    }

    /// Tears down every tunnel to `remote_node_id`, across all VNIs.
    pub fn teardown_all_for_remote(&self, remote_node_id: &NodeId) -> Vec<Tunnel> {
        let doomed: Vec<_> = self
            .tunnels
            .iter()
            .filter(|e| &e.key().0 == remote_node_id)
            .map(|e| e.key().clone())
            .collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for key in doomed {
            if let Some((_, tunnel)) = self.tunnels.remove(&key) {
                removed.push(tunnel);
            }
        }
        removed
    }

    pub fn list_tunnels(&self) -> Vec<Tunnel> {
        self.tunnels.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::RecordingBridgeControl;
    use chrono::Utc;

    fn sample_network(id: &str, vni: u32) -> Network {
        Network {
            schema_version: 1,
            id: id.into(),
            name: id.into(),
            network_type: NetworkType::Vxlan,
            vni,
            vlan_id: None,
            mtu: 1450,
            status: fleetd_core::network::NetworkStatus::Active,
            subnet_ids: vec![],
            created_at: Utc::now(),
        }
    }

    fn manager() -> VxlanManager {
        VxlanManager::new(
            Arc::new(RecordingBridgeControl::new()),
            NodeId("local".into()),
            "10.1.0.1".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let mgr = manager();
        mgr.initialize().await.unwrap();
        mgr.initialize().await.unwrap();
    }

    #[test]
    fn register_network_rejects_vni_collision_with_different_network() {
        let mgr = manager();
        mgr.register_network(sample_network("a", 100)).unwrap();
        let err = mgr.register_network(sample_network("b", 100)).unwrap_err();
        assert_eq!(err.kind(), fleetd_core::ErrorKind::AlreadyExists);
    }

    #[test]
    fn register_network_same_id_is_idempotent() {
        let mgr = manager();
        mgr.register_network(sample_network("a", 100)).unwrap();
        mgr.register_network(sample_network("a", 100)).unwrap();
    }

    #[tokio::test]
    async fn create_tunnel_returns_existing_on_repeat() {
        let mgr = manager();
        let remote = NodeId("remote".into());
        let t1 = mgr
            .create_tunnel(remote.clone(), "10.1.0.2".parse().unwrap(), 100)
            .await
            .unwrap();
        let t2 = mgr
            .create_tunnel(remote, "10.1.0.2".parse().unwrap(), 100)
            .await
            .unwrap();
        assert_eq!(t1.id, t2.id);
        assert_eq!(mgr.list_tunnels().len(), 1);
    }
}
