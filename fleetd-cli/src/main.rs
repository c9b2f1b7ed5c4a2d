//! Command-line client for the cluster control plane. Talks to a running
//! `fleetd-orchestrator` over its REST surface: node registration and
//! lifecycle, instance create/start/stop/restart/delete/stats, and network
//! and IP-allocation administration.

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

mod args;
mod client;
mod commands;
mod instance;
mod network;
mod node;
mod utils;

use client::FleetClient;
use commands::*;

/// Command line client for the cluster control plane.
#[derive(Parser)]
#[command(name = "fleetd-cli")]
#[command(about = "A CLI client for the fleetd cluster control plane")]
#[command(version)]
struct Cli {
    /// Orchestrator base URL.
    #[arg(short, long, default_value = "http://localhost:7000")]
    url: String,

    /// Request timeout in seconds.
    #[arg(short, long, default_value = "30")]
    timeout: u64,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a node with the cluster.
    RegisterNode(RegisterNodeArgs),
    /// Fetch a single node by id.
    GetNode(NodeIdArgs),
    /// List registered nodes.
    ListNodes(ListNodesArgs),
    /// Deregister a node from the cluster.
    DeregisterNode(NodeIdArgs),

    /// Create an instance.
    CreateInstance(CreateInstanceArgs),
    /// Fetch a single instance by id.
    GetInstance(InstanceIdArgs),
    /// List instances.
    ListInstances(ListInstancesArgs),
    /// Delete an instance.
    DeleteInstance(DeleteInstanceArgs),
    /// Start a stopped instance.
    StartInstance(InstanceIdArgs),
    /// Stop a running instance.
    StopInstance(StopInstanceArgs),
    /// Restart an instance.
    RestartInstance(StopInstanceArgs),
    /// Show live resource usage for an instance.
    InstanceStats(InstanceIdArgs),

    /// Create an overlay network.
    CreateNetwork(CreateNetworkArgs),
    /// Fetch a single network by id.
    GetNetwork(NetworkIdArgs),
    /// List networks.
    ListNetworks,
    /// Create a subnet within a network.
    CreateSubnet(CreateSubnetArgs),
    /// List subnets, optionally scoped to a network.
    ListSubnets(ListSubnetsArgs),
    /// Delete a subnet.
    DeleteSubnet(SubnetIdArgs),
    /// Allocate an IP address from a subnet's pool.
    AllocateIp(AllocateIpArgs),
    /// Release a previously allocated IP address.
    ReleaseIp(ReleaseIpArgs),
    /// List a subnet's current IP allocations.
    ListAllocations(SubnetIdArgs),
    /// List the cluster's VTEPs.
    ListVteps,

    /// Check orchestrator connectivity and print cluster summary.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(format!("fleetd_cli={level}")).init();
    info!(url = %cli.url, "fleetd-cli starting");

    let client = FleetClient::new(cli.url, Duration::from_secs(cli.timeout))?;

    match cli.command {
        Commands::RegisterNode(args) => execute_register_node(&client, &args).await?,
        Commands::GetNode(args) => execute_get_node(&client, &args).await?,
        Commands::ListNodes(args) => execute_list_nodes(&client, &args).await?,
        Commands::DeregisterNode(args) => execute_deregister_node(&client, &args).await?,

        Commands::CreateInstance(args) => execute_create_instance(&client, &args).await?,
        Commands::GetInstance(args) => execute_get_instance(&client, &args).await?,
        Commands::ListInstances(args) => execute_list_instances(&client, &args).await?,
        Commands::DeleteInstance(args) => execute_delete_instance(&client, &args).await?,
        Commands::StartInstance(args) => execute_start_instance(&client, &args).await?,
        Commands::StopInstance(args) => execute_stop_instance(&client, &args).await?,
        Commands::RestartInstance(args) => execute_restart_instance(&client, &args).await?,
        Commands::InstanceStats(args) => execute_instance_stats(&client, &args).await?,

        Commands::CreateNetwork(args) => execute_create_network(&client, &args).await?,
        Commands::GetNetwork(args) => execute_get_network(&client, &args).await?,
        Commands::ListNetworks => execute_list_networks(&client).await?,
        Commands::CreateSubnet(args) => execute_create_subnet(&client, &args).await?,
        Commands::ListSubnets(args) => execute_list_subnets(&client, &args).await?,
        Commands::DeleteSubnet(args) => execute_delete_subnet(&client, &args).await?,
        Commands::AllocateIp(args) => execute_allocate_ip(&client, &args).await?,
        Commands::ReleaseIp(args) => execute_release_ip(&client, &args).await?,
        Commands::ListAllocations(args) => execute_list_allocations(&client, &args).await?,
        Commands::ListVteps => execute_list_vteps(&client).await?,

        // No dedicated health route exists on the orchestrator (unlike the
        // agent); cluster summary doubles as the reachability check.
        Commands::Health => match client.cluster_info().await {
            Ok(info) => {
                println!("✓ Orchestrator is healthy");
                println!(
                    "  Nodes: {} ({} ready)  Instances: {}",
                    info.node_count, info.ready_node_count, info.instance_count
                );
            }
            Err(e) => {
                error!("health check failed: {e}");
                println!("✗ Orchestrator is unreachable: {e}");
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
