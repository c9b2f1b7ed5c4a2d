//! Per-node liveness (§4.C): agent-side lease refresh and server-side node
//! index with watch dispatch.

pub mod agent;
pub mod monitor;

pub use agent::{AgentHeartbeat, HeartbeatPayload};
pub use monitor::{HeartbeatMonitor, NodeEvent, NodeEventKind};
