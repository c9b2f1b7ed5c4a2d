//! Overlay network entities: networks, subnets, IP allocations, VTEPs, tunnels (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

pub const VNI_MIN: u32 = 1;
pub const VNI_MAX: u32 = (1 << 24) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    Vxlan,
    Vlan,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    Active,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub id: String,
    pub name: String,
    pub network_type: NetworkType,
    pub vni: u32,
    pub vlan_id: Option<u16>,
    pub mtu: u32,
    pub status: NetworkStatus,
    pub subnet_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

fn default_schema_version() -> u16 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPool {
    pub start: std::net::Ipv4Addr,
    pub end: std::net::Ipv4Addr,
}

impl AllocationPool {
    pub fn contains(&self, ip: std::net::Ipv4Addr) -> bool {
        u32::from(ip) >= u32::from(self.start) && u32::from(ip) <= u32::from(self.end)
    }

    pub fn iter(&self) -> impl Iterator<Item = std::net::Ipv4Addr> {
        let start = u32::from(self.start);
        let end = u32::from(self.end);
        (start..=end).map(std::net::Ipv4Addr::from)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub id: String,
    pub network_id: String,
    pub cidr: ipnet::Ipv4Net,
    pub gateway_ip: Option<std::net::Ipv4Addr>,
    pub dhcp: bool,
    pub dns: Vec<std::net::Ipv4Addr>,
    pub allocation_pools: Vec<AllocationPool>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationStatus {
    Allocated,
    Released,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAllocation {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub id: String,
    pub subnet_id: String,
    pub ip_address: std::net::Ipv4Addr,
    pub mac: Option<String>,
    pub instance_id: Option<String>,
    pub port_id: Option<String>,
    pub hostname: Option<String>,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VtepStatus {
    Active,
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vtep {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub node_id: NodeId,
    pub ip: std::net::IpAddr,
    pub port: u16,
    pub interface: String,
    pub status: VtepStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelStatus {
    Up,
    Down,
}

/// Keyed by `(remote_node_id, vni)` per §3; `id` is derived from that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunnel {
    pub id: String,
    pub vni: u32,
    pub local_vtep_id: NodeId,
    pub remote_vtep_id: NodeId,
    pub remote_ip: std::net::IpAddr,
    pub status: TunnelStatus,
}

impl Tunnel {
    pub fn key(remote_node_id: &NodeId, vni: u32) -> (NodeId, u32) {
        (remote_node_id.clone(), vni)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    Allow,
    Deny,
}

/// `{direction, protocol, port_min, port_max, remote_ip_prefix, action}` — one
/// security-group rule, per §6's NetworkService shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    pub direction: Direction,
    pub protocol: Protocol,
    pub port_min: Option<u16>,
    pub port_max: Option<u16>,
    pub remote_ip_prefix: Option<ipnet::Ipv4Net>,
    pub action: RuleAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vni_bounds() {
        assert_eq!(VNI_MIN, 1);
        assert_eq!(VNI_MAX, 16_777_215);
    }

    #[test]
    fn pool_contains_checks_inclusive_range() {
        let pool = AllocationPool {
            start: "10.0.1.2".parse().unwrap(),
            end: "10.0.1.254".parse().unwrap(),
        };
        assert!(pool.contains("10.0.1.2".parse().unwrap()));
        assert!(pool.contains("10.0.1.254".parse().unwrap()));
        assert!(!pool.contains("10.0.1.255".parse().unwrap()));
    }

    #[test]
    fn tunnel_key_is_remote_node_and_vni() {
        let a = Tunnel::key(&NodeId("n1".into()), 100);
        let b = Tunnel::key(&NodeId("n1".into()), 100);
        assert_eq!(a, b);
    }
}
