//! Node commands: register/list/get/deregister against `ClusterService`.

use std::collections::HashSet;

use anyhow::Result;
use fleetd_core::instance::InstanceType;
use fleetd_core::node::Resources;
use tracing::{error, info};

use crate::args::{ListNodesArgs, NodeIdArgs, RegisterNodeArgs};
use crate::client::FleetClient;

fn parse_instance_type(s: &str) -> Result<InstanceType> {
    match s {
        "Vm" => Ok(InstanceType::Vm),
        "Container" => Ok(InstanceType::Container),
        "Microvm" => Ok(InstanceType::Microvm),
        other => Err(anyhow::anyhow!("unknown instance type '{other}', expected Vm, Container, or Microvm")),
    }
}

pub async fn execute_register(client: &FleetClient, args: &RegisterNodeArgs) -> Result<()> {
    let supported_instance_types = args
        .instance_types
        .iter()
        .map(|s| parse_instance_type(s))
        .collect::<Result<HashSet<_>>>()?;
    let capacity = Resources {
        cpu_cores: args.cpu_cores,
        memory_bytes: args.memory_bytes,
        disk_bytes: args.disk_bytes,
        gpu_count: args.gpu_count,
    };
    match client
        .register_node(
            args.hostname.clone(),
            args.ip.clone(),
            args.port,
            args.region.clone(),
            args.zone.clone(),
            capacity,
            supported_instance_types,
        )
        .await
    {
        Ok(resp) => {
            info!(node_id = %resp.node_id, "node registered");
            println!("✓ Node registered: {}", resp.node_id);
            println!("  Heartbeat interval: {}s", resp.heartbeat_interval_seconds);
        }
        Err(e) => {
            error!("failed to register node: {e}");
            eprintln!("✗ Failed to register node: {e}");
            if e.to_string().contains("connect") {
                eprintln!("  → Check the orchestrator URL and that it is reachable");
            }
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_get(client: &FleetClient, args: &NodeIdArgs) -> Result<()> {
    match client.get_node(&args.node_id).await {
        Ok(node) => {
            println!("{}", serde_json::to_string_pretty(&node)?);
        }
        Err(e) => {
            eprintln!("✗ Failed to get node {}: {e}", args.node_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_list(client: &FleetClient, args: &ListNodesArgs) -> Result<()> {
    match client.list_nodes(args.page_size, args.page_token.clone()).await {
        Ok(page) => {
            for node in &page.items {
                println!("{:<36} {:<20} {:<15} {:?}", node.id, node.hostname, node.ip, node.status);
            }
            println!("({} of {} total)", page.items.len(), page.total_count);
            if let Some(token) = page.next_page_token {
                println!("next page token: {token}");
            }
        }
        Err(e) => {
            eprintln!("✗ Failed to list nodes: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_deregister(client: &FleetClient, args: &NodeIdArgs) -> Result<()> {
    match client.deregister_node(&args.node_id).await {
        Ok(()) => println!("✓ Node {} deregistered", args.node_id),
        Err(e) => {
            eprintln!("✗ Failed to deregister node {}: {e}", args.node_id);
            std::process::exit(1);
        }
    }
    Ok(())
}
