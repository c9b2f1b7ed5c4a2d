//! Binary entry point for the per-node agent (§4.H): loads configuration,
//! selects a compute driver, joins the cluster, reconciles driver reality
//! against the store, and serves the local RPC surface.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fleetd_core::config::ClusterConfig;
use fleetd_core::node::{Node, NodeCondition, NodeRole, NodeStatus, Resources};
use fleetd_core::{ClusterError, ClusterResult, NodeId};
use fleetd_driver::{ComputeDriver, ContainerRuntimeDriver, LibvirtVmDriver, MicroVmDriver};
use fleetd_heartbeat::{AgentHeartbeat, HeartbeatPayload};
use fleetd_overlay::{RecordingBridgeControl, VtepManager, VxlanManager};
use fleetd_registry::Registry;
use fleetd_store::LocalStore;

#[derive(Parser, Debug)]
#[command(name = "fleetd-agent", about = "Per-node compute agent")]
struct Args {
    /// Path to a JSON config file; missing files fall back to defaults.
    #[arg(long, default_value = "/etc/fleetd/agent.json")]
    config: String,

    /// Overrides the node id; defaults to a freshly generated one.
    #[arg(long)]
    node_id: Option<String>,

    #[arg(long, default_value = "default")]
    region: String,

    #[arg(long, default_value = "default")]
    zone: String,
}

fn select_driver(name: &str) -> ClusterResult<Arc<dyn ComputeDriver>> {
    match name {
        "libvirt" => Ok(Arc::new(LibvirtVmDriver::new())),
        "container" => Ok(Arc::new(ContainerRuntimeDriver::new())),
        "microvm" => Ok(Arc::new(MicroVmDriver::new())),
        other => Err(ClusterError::invalid_argument(format!(
            "unknown driver_name {other:?}, expected one of libvirt|container|microvm"
        ))),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = ClusterConfig::load(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(cfg.log_level.as_filter())
        .init();

    let node_id = NodeId(args.node_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string()));
    let (ip, port) = parse_bind_address(&cfg.bind_address)?;

    tracing::info!(node_id = %node_id, bind = %cfg.bind_address, driver = %cfg.driver_name, "starting fleetd-agent");

    let driver = select_driver(&cfg.driver_name)?;

    // §9: the agent only ever sees `Arc<dyn CoordinationStore>`; `LocalStore`
    // stands in here until a networked backend is wired up.
    let store = LocalStore::new();
    let registry = Registry::new(store);

    let node = Node {
        schema_version: 1,
        id: node_id.clone(),
        hostname: hostname(),
        ip: ip.to_string(),
        port,
        role: NodeRole::Worker,
        status: NodeStatus::Pending,
        region: args.region,
        zone: args.zone,
        capacity: default_capacity(),
        allocatable: default_capacity(),
        allocated: Resources::default(),
        supported_instance_types: cfg.supported_instance_types.iter().copied().collect::<HashSet<_>>(),
        conditions: Vec::new(),
        created_at: chrono::Utc::now(),
        last_seen: chrono::Utc::now(),
    };

    let lease_ttl = ClusterConfig::default_lease_ttl_for_interval(cfg.heartbeat_interval_seconds);
    let heartbeat = AgentHeartbeat::new(
        registry.clone(),
        node,
        Duration::from_secs(cfg.heartbeat_interval_seconds),
        Duration::from_secs(lease_ttl),
    );
    heartbeat.register().await?;

    let driver_for_sample = driver.clone();
    heartbeat.clone().spawn(move || {
        let _ = &driver_for_sample;
        HeartbeatPayload {
            status: NodeStatus::Ready,
            allocated: Resources::default(),
            conditions: vec![NodeCondition {
                kind: "Ready".to_string(),
                status: true,
                message: "agent running".to_string(),
                last_transition: chrono::Utc::now(),
            }],
        }
    });

    if cfg.overlay_enabled {
        let overlay_ip: IpAddr = cfg
            .overlay_local_ip
            .parse()
            .map_err(|e| ClusterError::invalid_argument(format!("invalid overlay_local_ip: {e}")))?;
        let bridge = Arc::new(RecordingBridgeControl::new());
        let vxlan = VxlanManager::new(bridge, node_id.clone(), overlay_ip);
        vxlan.initialize().await?;
        let vtep = VtepManager::new(
            registry.clone(),
            Arc::new(vxlan),
            node_id.clone(),
            overlay_ip,
            4789,
            "vxlan0",
            lease_ttl,
            Duration::from_secs(cfg.heartbeat_interval_seconds),
        );
        vtep.start().await?;
    }

    fleetd_agent::reconcile::reconcile(&registry, &driver, &node_id).await;

    let state = fleetd_agent::AppState {
        driver,
        registry,
        node_id,
    };
    let app = fleetd_agent::api::router(state);

    let listener = tokio::net::TcpListener::bind((ip, port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "fleetd-agent listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn parse_bind_address(addr: &str) -> ClusterResult<(IpAddr, u16)> {
    let socket: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| ClusterError::invalid_argument(format!("invalid bind_address {addr:?}: {e}")))?;
    Ok((socket.ip(), socket.port()))
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn default_capacity() -> Resources {
    Resources {
        cpu_cores: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as u32,
        memory_bytes: 16 * 1024 * 1024 * 1024,
        disk_bytes: 200 * 1024 * 1024 * 1024,
        gpu_count: 0,
    }
}
