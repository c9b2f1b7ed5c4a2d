//! Node entity and resource accounting (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{ClusterError, ClusterResult};
use crate::instance::InstanceType;

/// Server-allocated, immutable node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Master,
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Pending,
    Ready,
    NotReady,
    Unknown,
}

/// `{cpu_cores, memory_bytes, disk_bytes, gpu_count}` — all counters monotonically
/// comparable component-wise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu_cores: u32,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub gpu_count: u32,
}

impl Resources {
    /// `self ≤ other` component-wise.
    pub fn fits_within(&self, other: &Resources) -> bool {
        self.cpu_cores <= other.cpu_cores
            && self.memory_bytes <= other.memory_bytes
            && self.disk_bytes <= other.disk_bytes
            && self.gpu_count <= other.gpu_count
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cpu_cores: self.cpu_cores.saturating_sub(other.cpu_cores),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
            disk_bytes: self.disk_bytes.saturating_sub(other.disk_bytes),
            gpu_count: self.gpu_count.saturating_sub(other.gpu_count),
        }
    }

    pub fn checked_add(&self, other: &Resources) -> Option<Resources> {
        Some(Resources {
            cpu_cores: self.cpu_cores.checked_add(other.cpu_cores)?,
            memory_bytes: self.memory_bytes.checked_add(other.memory_bytes)?,
            disk_bytes: self.disk_bytes.checked_add(other.disk_bytes)?,
            gpu_count: self.gpu_count.checked_add(other.gpu_count)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCondition {
    pub kind: String,
    pub status: bool,
    pub message: String,
    pub last_transition: DateTime<Utc>,
}

/// A compute node as held in the registry (§3 Node entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub id: NodeId,
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    pub role: NodeRole,
    pub status: NodeStatus,
    pub region: String,
    pub zone: String,
    pub capacity: Resources,
    pub allocatable: Resources,
    pub allocated: Resources,
    pub supported_instance_types: HashSet<InstanceType>,
    pub conditions: Vec<NodeCondition>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

fn default_schema_version() -> u16 {
    1
}

impl Node {
    /// Free capacity, `allocatable − allocated`. Never underflows per the
    /// `allocated ≤ allocatable` invariant, but clamps defensively anyway.
    pub fn free(&self) -> Resources {
        self.allocatable.saturating_sub(&self.allocated)
    }

    /// Checks the §3 invariant `allocated ≤ allocatable ≤ capacity`.
    pub fn check_invariant(&self) -> ClusterResult<()> {
        if !self.allocated.fits_within(&self.allocatable) {
            return Err(ClusterError::internal(format!(
                "node {}: allocated exceeds allocatable",
                self.id
            )));
        }
        if !self.allocatable.fits_within(&self.capacity) {
            return Err(ClusterError::internal(format!(
                "node {}: allocatable exceeds capacity",
                self.id
            )));
        }
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status, NodeStatus::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(allocatable: Resources, allocated: Resources) -> Node {
        Node {
            schema_version: 1,
            id: NodeId("n1".into()),
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
            allocatable,
            allocated,
            supported_instance_types: HashSet::new(),
            conditions: vec![],
            created_at: Utc::now(),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn free_resources_subtract_allocated() {
        let n = node(
            Resources {
                cpu_cores: 16,
                memory_bytes: 64,
                disk_bytes: 500,
                gpu_count: 0,
            },
            Resources {
                cpu_cores: 4,
                memory_bytes: 8,
                disk_bytes: 0,
                gpu_count: 0,
            },
        );
        assert_eq!(n.free().cpu_cores, 12);
    }

    #[test]
    fn invariant_rejects_allocated_over_allocatable() {
        let n = node(
            Resources {
                cpu_cores: 4,
                ..Default::default()
            },
            Resources {
                cpu_cores: 8,
                ..Default::default()
            },
        );
        assert!(n.check_invariant().is_err());
    }

    #[test]
    fn invariant_rejects_allocatable_over_capacity() {
        let n = node(
            Resources {
                cpu_cores: 32,
                ..Default::default()
            },
            Resources::default(),
        );
        assert!(n.check_invariant().is_err());
    }
}
