//! Shared types, configuration, and error taxonomy for the fleetd cluster
//! control plane: the cross-cutting crate every other `fleetd-*` crate
//! depends on.

pub mod config;
pub mod error;
pub mod instance;
pub mod network;
pub mod node;
pub mod pagination;

pub use config::ClusterConfig;
pub use error::{ClusterError, ClusterResult, DriverError, ErrorKind};
pub use instance::{Instance, InstanceId, InstanceSpec, InstanceState, InstanceType};
pub use node::{Node, NodeCondition, NodeId, NodeRole, NodeStatus, Resources};
