//! Abstract bridge-control contract (§4.E.1): the production OVS/eBPF-backed
//! implementation is an out-of-scope external collaborator (§1); only the
//! contract and a recording test double are shipped here, stub but
//! contract-faithful.

use async_trait::async_trait;
use fleetd_core::ClusterResult;
use std::net::IpAddr;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct FlowRule {
    pub table: u8,
    pub matches: String,
    pub actions: String,
}

#[derive(Debug, Clone, Default)]
pub struct PortStats {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[async_trait]
pub trait BridgeControl: Send + Sync {
    async fn create_bridge(&self, name: &str) -> ClusterResult<()>;

    async fn add_port(&self, bridge: &str, port: &str) -> ClusterResult<()>;

    /// Returns the name of the port created for this tunnel.
    async fn add_vxlan_port(
        &self,
        bridge: &str,
        port_name: &str,
        local_ip: IpAddr,
        remote_ip: IpAddr,
    ) -> ClusterResult<()>;

    async fn install_flow(&self, bridge: &str, rule: FlowRule) -> ClusterResult<()>;

    async fn port_stats(&self, bridge: &str, port: &str) -> ClusterResult<PortStats>;
}

/// Records every call for assertions in end-to-end mesh tests; never touches
/// the host network stack.
#[derive(Default)]
pub struct RecordingBridgeControl {
    calls: Mutex<Vec<String>>,
}

impl RecordingBridgeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl BridgeControl for RecordingBridgeControl {
    async fn create_bridge(&self, name: &str) -> ClusterResult<()> {
        self.record(format!("create_bridge({name})"));
        Ok(())
    }

    async fn add_port(&self, bridge: &str, port: &str) -> ClusterResult<()> {
        self.record(format!("add_port({bridge},{port})"));
        Ok(())
    }

    async fn add_vxlan_port(
        &self,
        bridge: &str,
        port_name: &str,
        local_ip: IpAddr,
        remote_ip: IpAddr,
    ) -> ClusterResult<()> {
        self.record(format!(
            "add_vxlan_port({bridge},{port_name},{local_ip},{remote_ip})"
        ));
        Ok(())
    }

    async fn install_flow(&self, bridge: &str, rule: FlowRule) -> ClusterResult<()> {
        self.record(format!(
            "install_flow({bridge},table={},match={},action={})",
            rule.table, rule.matches, rule.actions
        ));
        Ok(())
    }

    async fn port_stats(&self, bridge: &str, port: &str) -> ClusterResult<PortStats> {
        self.record(format!("port_stats({bridge},{port})"));
        Ok(PortStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_double_logs_calls_in_order() {
        let bridge = RecordingBridgeControl::new();
        bridge.create_bridge("br-int").await.unwrap();
        bridge.create_bridge("br-tun").await.unwrap();
        assert_eq!(
            bridge.calls(),
            vec!["create_bridge(br-int)", "create_bridge(br-tun)"]
        );
    }
}
