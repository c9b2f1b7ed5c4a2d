//! Instance entity, spec, and state machine (§3, §4.I state diagram).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::node::{NodeId, Resources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceType {
    Vm,
    Container,
    Microvm,
}

/// Server-allocated, globally unique instance identifier. Time-sorted so that
/// lexicographic ordering of ids matches creation order (`create_instance_id`
/// in §4.B).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        InstanceId(s)
    }
}

/// The collapsed, stable instance states (§9.1 resolves the open question:
/// transient verbs like "starting"/"stopping" are carried as `state_reason`
/// text alongside one of these, not as extra variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Unknown,
    Pending,
    Creating,
    Running,
    Stopped,
    Paused,
    Failed,
    Deleted,
}

impl InstanceState {
    /// Whether `self -> to` is an allowed edge of the §4.I state diagram.
    ///
    /// `Deleted -> Deleted` is a special case: delete is idempotent (§8), so
    /// it's handled before the guarded or-chain below rather than folded into
    /// it — a trailing guard on an or-pattern applies to every alternative in
    /// the chain, so `(_, Deleted) if self != Deleted` would otherwise also
    /// suppress this one case.
    pub fn can_transition_to(self, to: InstanceState) -> bool {
        use InstanceState::*;
        if self == Deleted && to == Deleted {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Creating)
                | (Pending, Deleted)
                | (Pending, Failed)
                | (Creating, Running)
                | (Creating, Failed)
                | (Creating, Deleted)
                | (Running, Stopped)
                | (Running, Paused)
                | (Running, Deleted)
                | (Running, Failed)
                | (Stopped, Running)
                | (Stopped, Deleted)
                | (Paused, Running)
                | (Paused, Deleted)
                | (Failed, Deleted)
                | (_, Deleted) if self != Deleted
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSpec {
    pub size_bytes: u64,
    pub source_image: Option<String>,
}

/// `{network_id, subnet_id, overlay_type, vni?, mac?, ip?, binding_type, device_name?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAttachmentSpec {
    pub network_id: String,
    pub subnet_id: String,
    pub overlay_type: OverlayType,
    pub vni: Option<u32>,
    pub mac: Option<String>,
    pub ip: Option<String>,
    pub binding_type: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlayType {
    None,
    Vxlan,
    Vlan,
    Bridge,
}

/// Immutable-after-creation instance specification (§3 InstanceSpec).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub image_ref: String,
    pub cpu_cores: u32,
    pub memory_bytes: u64,
    pub disks: Vec<DiskSpec>,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub kernel: Option<String>,
    pub initrd: Option<String>,
    pub network: Option<NetworkAttachmentSpec>,
    pub limits: Resources,
}

impl InstanceSpec {
    pub fn required_resources(&self) -> Resources {
        Resources {
            cpu_cores: self.cpu_cores,
            memory_bytes: self.memory_bytes,
            disk_bytes: self.disks.iter().map(|d| d.size_bytes).sum(),
            gpu_count: self.limits.gpu_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub id: InstanceId,
    pub name: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    pub state: InstanceState,
    pub spec: InstanceSpec,
    pub node_id: Option<NodeId>,
    pub ip_address: Option<String>,
    pub metadata: HashMap<String, String>,
    pub state_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

fn default_schema_version() -> u16 {
    1
}

impl Instance {
    /// Applies `to` if the transition is legal per the state diagram; returns
    /// the previous state on success for callers that want to emit a delta.
    pub fn transition(
        &mut self,
        to: InstanceState,
        reason: Option<String>,
    ) -> Result<InstanceState, crate::error::ClusterError> {
        if !self.state.can_transition_to(to) {
            return Err(crate::error::ClusterError::failed_precondition(format!(
                "instance {}: illegal transition {:?} -> {:?}",
                self.id, self.state, to
            )));
        }
        let prev = self.state;
        self.state = to;
        self.state_reason = reason;
        if to == InstanceState::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        Ok(prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_creating_allowed() {
        assert!(InstanceState::Pending.can_transition_to(InstanceState::Creating));
    }

    #[test]
    fn deleted_is_terminal() {
        assert!(!InstanceState::Deleted.can_transition_to(InstanceState::Running));
    }

    #[test]
    fn stopped_to_running_allowed_start() {
        assert!(InstanceState::Stopped.can_transition_to(InstanceState::Running));
    }

    #[test]
    fn any_non_deleted_state_can_delete() {
        for s in [
            InstanceState::Pending,
            InstanceState::Creating,
            InstanceState::Running,
            InstanceState::Stopped,
            InstanceState::Paused,
            InstanceState::Failed,
        ] {
            assert!(s.can_transition_to(InstanceState::Deleted));
        }
    }

    #[test]
    fn delete_is_idempotent() {
        assert!(InstanceState::Deleted.can_transition_to(InstanceState::Deleted));
    }

    #[test]
    fn double_delete_via_transition_succeeds() {
        let mut instance = Instance {
            schema_version: 1,
            id: InstanceId("i-1".into()),
            name: "i-1".into(),
            instance_type: InstanceType::Container,
            state: InstanceState::Running,
            spec: InstanceSpec {
                image_ref: "alpine".into(),
                cpu_cores: 1,
                memory_bytes: 1,
                disks: vec![],
                command: vec![],
                env: HashMap::new(),
                kernel: None,
                initrd: None,
                network: None,
                limits: Resources::default(),
            },
            node_id: None,
            ip_address: None,
            metadata: HashMap::new(),
            state_reason: None,
            created_at: Utc::now(),
            started_at: None,
        };
        instance.transition(InstanceState::Deleted, None).unwrap();
        instance.transition(InstanceState::Deleted, None).unwrap();
        assert_eq!(instance.state, InstanceState::Deleted);
    }
}
