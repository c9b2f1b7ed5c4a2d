//! Instance commands: create/get/list/delete/start/stop/restart/stats
//! against `ComputeService`.

use anyhow::Result;
use fleetd_core::instance::{DiskSpec, InstanceSpec, InstanceType};
use fleetd_core::node::Resources;
use tracing::{error, info};

use crate::args::{CreateInstanceArgs, DeleteInstanceArgs, InstanceIdArgs, ListInstancesArgs, StopInstanceArgs};
use crate::client::FleetClient;
use crate::utils::{format_bytes, parse_metadata};

fn parse_instance_type(s: &str) -> Result<InstanceType> {
    match s {
        "Vm" => Ok(InstanceType::Vm),
        "Container" => Ok(InstanceType::Container),
        "Microvm" => Ok(InstanceType::Microvm),
        other => Err(anyhow::anyhow!("unknown instance type '{other}', expected Vm, Container, or Microvm")),
    }
}

pub async fn execute_create(client: &FleetClient, args: &CreateInstanceArgs) -> Result<()> {
    let instance_type = parse_instance_type(&args.r#type)?;
    let metadata = match &args.metadata {
        Some(m) => parse_metadata(m)?,
        None => Default::default(),
    };
    let command = args
        .command
        .as_deref()
        .map(|c| c.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    let spec = InstanceSpec {
        image_ref: args.image.clone(),
        cpu_cores: args.cpu_cores,
        memory_bytes: args.memory_bytes,
        disks: if args.disk_bytes > 0 {
            vec![DiskSpec { size_bytes: args.disk_bytes, source_image: None }]
        } else {
            Vec::new()
        },
        command,
        env: Default::default(),
        kernel: None,
        initrd: None,
        network: None,
        limits: Resources::default(),
    };

    match client
        .create_instance(
            args.name.clone(),
            instance_type,
            spec,
            metadata,
            args.preferred_node_id.clone(),
            args.region.clone(),
            args.zone.clone(),
        )
        .await
    {
        Ok(instance) => {
            info!(instance_id = %instance.id, state = ?instance.state, "instance created");
            println!("✓ Instance created: {}", instance.id);
            println!("  State: {:?}", instance.state);
            if let Some(node_id) = &instance.node_id {
                println!("  Node: {node_id}");
            }
            if instance.state == fleetd_core::InstanceState::Failed {
                if let Some(reason) = &instance.state_reason {
                    eprintln!("  → Scheduling failed: {reason}");
                }
            }
        }
        Err(e) => {
            error!("failed to create instance: {e}");
            eprintln!("✗ Failed to create instance: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_get(client: &FleetClient, args: &InstanceIdArgs) -> Result<()> {
    match client.get_instance(&args.instance_id).await {
        Ok(instance) => println!("{}", serde_json::to_string_pretty(&instance)?),
        Err(e) => {
            eprintln!("✗ Failed to get instance {}: {e}", args.instance_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_list(client: &FleetClient, args: &ListInstancesArgs) -> Result<()> {
    match client.list_instances(args.page_size, args.page_token.clone()).await {
        Ok(page) => {
            for instance in &page.items {
                println!(
                    "{:<36} {:<20} {:?} {:?}",
                    instance.id, instance.name, instance.instance_type, instance.state
                );
            }
            println!("({} of {} total)", page.items.len(), page.total_count);
            if let Some(token) = page.next_page_token {
                println!("next page token: {token}");
            }
        }
        Err(e) => {
            eprintln!("✗ Failed to list instances: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_delete(client: &FleetClient, args: &DeleteInstanceArgs) -> Result<()> {
    match client.delete_instance(&args.instance_id, args.force).await {
        Ok(()) => println!("✓ Instance {} deleted", args.instance_id),
        Err(e) => {
            eprintln!("✗ Failed to delete instance {}: {e}", args.instance_id);
            if !args.force {
                eprintln!("  → Retry with --force to delete despite driver errors");
            }
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_start(client: &FleetClient, args: &InstanceIdArgs) -> Result<()> {
    match client.start_instance(&args.instance_id).await {
        Ok(instance) => println!("✓ Instance {} state: {:?}", instance.id, instance.state),
        Err(e) => {
            eprintln!("✗ Failed to start instance {}: {e}", args.instance_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_stop(client: &FleetClient, args: &StopInstanceArgs) -> Result<()> {
    match client.stop_instance(&args.instance_id, args.force).await {
        Ok(instance) => println!("✓ Instance {} state: {:?}", instance.id, instance.state),
        Err(e) => {
            eprintln!("✗ Failed to stop instance {}: {e}", args.instance_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_restart(client: &FleetClient, args: &StopInstanceArgs) -> Result<()> {
    match client.restart_instance(&args.instance_id, args.force).await {
        Ok(instance) => println!("✓ Instance {} state: {:?}", instance.id, instance.state),
        Err(e) => {
            eprintln!("✗ Failed to restart instance {}: {e}", args.instance_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_stats(client: &FleetClient, args: &InstanceIdArgs) -> Result<()> {
    match client.instance_stats(&args.instance_id).await {
        Ok(stats) => {
            println!("CPU:     {:.1}%", stats.cpu_usage_percent);
            println!("Memory:  {}", format_bytes(stats.memory_bytes_used));
            println!("Disk:    {}", format_bytes(stats.disk_bytes_used));
            println!("Net RX:  {}", format_bytes(stats.network_rx_bytes));
            println!("Net TX:  {}", format_bytes(stats.network_tx_bytes));
        }
        Err(e) => {
            eprintln!("✗ Failed to get stats for instance {}: {e}", args.instance_id);
            std::process::exit(1);
        }
    }
    Ok(())
}
