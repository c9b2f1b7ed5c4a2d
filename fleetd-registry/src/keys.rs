//! Reserved coordination-store key layout (§4.B).

use fleetd_core::{InstanceId, NodeId};

pub const NODES_PREFIX: &str = "/nodes/";
pub const INSTANCES_PREFIX: &str = "/instances/";
pub const NETWORKS_PREFIX: &str = "/network/networks/";
pub const SUBNETS_PREFIX: &str = "/network/subnets/";
pub const VTEPS_PREFIX: &str = "/network/vteps/";
pub const ALLOCATIONS_PREFIX: &str = "/network/allocations/";

pub fn node_key(id: &NodeId) -> String {
    format!("{NODES_PREFIX}{id}")
}

pub fn instance_key(id: &InstanceId) -> String {
    format!("{INSTANCES_PREFIX}{id}")
}

pub fn network_key(id: &str) -> String {
    format!("{NETWORKS_PREFIX}{id}")
}

pub fn subnet_key(id: &str) -> String {
    format!("{SUBNETS_PREFIX}{id}")
}

pub fn vtep_key(node_id: &NodeId) -> String {
    format!("{VTEPS_PREFIX}{node_id}")
}

pub fn allocation_prefix(subnet_id: &str) -> String {
    format!("{ALLOCATIONS_PREFIX}{subnet_id}/")
}

pub fn allocation_key(subnet_id: &str, ip: &str) -> String {
    format!("{ALLOCATIONS_PREFIX}{subnet_id}/{ip}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_key_is_under_reserved_prefix() {
        let k = node_key(&NodeId("n1".into()));
        assert_eq!(k, "/nodes/n1");
        assert!(k.starts_with(NODES_PREFIX));
    }

    #[test]
    fn allocation_key_nests_under_subnet() {
        let k = allocation_key("sub1", "10.0.1.2");
        assert_eq!(k, "/network/allocations/sub1/10.0.1.2");
        assert!(k.starts_with(&allocation_prefix("sub1")));
    }
}
