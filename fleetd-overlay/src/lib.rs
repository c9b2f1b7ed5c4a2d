//! VXLAN tunnel mesh and VTEP lifecycle management (§4.E, §4.F).

pub mod bridge;
pub mod vtep;
pub mod vxlan;

pub use bridge::{BridgeControl, FlowRule, PortStats, RecordingBridgeControl};
pub use vtep::VtepManager;
pub use vxlan::{VxlanManager, INTEGRATION_BRIDGE, TUNNEL_BRIDGE};
