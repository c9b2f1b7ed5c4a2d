//! Binary entry point for the orchestrator (§4.I): the central control plane
//! service the CLI and REST gateway collaborators talk to.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fleetd_core::ClusterConfig;
use fleetd_ipam::Ipam;
use fleetd_orchestrator::agent_client::AgentClient;
use fleetd_orchestrator::AppState;
use fleetd_registry::Registry;
use fleetd_store::LocalStore;

#[derive(Parser, Debug)]
#[command(name = "fleetd-orchestrator", about = "Cluster control plane")]
struct Args {
    #[arg(long, default_value = "/etc/fleetd/orchestrator.json")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = ClusterConfig::load(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(cfg.log_level.as_filter())
        .init();

    let (ip, port) = parse_bind_address(&cfg.bind_address)?;
    tracing::info!(bind = %cfg.bind_address, "starting fleetd-orchestrator");

    // §9: the only concrete `CoordinationStore` named anywhere below the
    // store crate; everything above sees `Arc<dyn CoordinationStore>`.
    let store = LocalStore::new();
    let registry = Registry::new(store);
    let ipam = Arc::new(Ipam::new(registry.clone()));
    let agents = AgentClient::new(Duration::from_secs(30))?;

    let state = AppState::new(registry, ipam, agents).await?;
    let app = fleetd_orchestrator::router(state);

    let listener = tokio::net::TcpListener::bind((ip, port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "fleetd-orchestrator listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn parse_bind_address(addr: &str) -> anyhow::Result<(std::net::IpAddr, u16)> {
    let socket: std::net::SocketAddr = addr.parse()?;
    Ok((socket.ip(), socket.port()))
}
