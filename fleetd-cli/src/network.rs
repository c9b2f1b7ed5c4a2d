//! Network commands: network/subnet CRUD and IP allocation against
//! `NetworkService`.

use anyhow::Result;
use fleetd_core::network::NetworkType;
use tracing::error;

use crate::args::{
    AllocateIpArgs, CreateNetworkArgs, CreateSubnetArgs, ListSubnetsArgs, NetworkIdArgs, ReleaseIpArgs, SubnetIdArgs,
};
use crate::client::FleetClient;

fn parse_network_type(s: &str) -> Result<NetworkType> {
    match s {
        "Vxlan" => Ok(NetworkType::Vxlan),
        "Vlan" => Ok(NetworkType::Vlan),
        "Flat" => Ok(NetworkType::Flat),
        other => Err(anyhow::anyhow!("unknown network type '{other}', expected Vxlan, Vlan, or Flat")),
    }
}

pub async fn execute_create_network(client: &FleetClient, args: &CreateNetworkArgs) -> Result<()> {
    let network_type = parse_network_type(&args.network_type)?;
    match client.create_network(args.name.clone(), network_type, args.vni, args.vlan_id, args.mtu).await {
        Ok(network) => println!("✓ Network created: {} (vni {})", network.id, network.vni),
        Err(e) => {
            error!("failed to create network: {e}");
            eprintln!("✗ Failed to create network: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_get_network(client: &FleetClient, args: &NetworkIdArgs) -> Result<()> {
    match client.get_network(&args.network_id).await {
        Ok(network) => println!("{}", serde_json::to_string_pretty(&network)?),
        Err(e) => {
            eprintln!("✗ Failed to get network {}: {e}", args.network_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_list_networks(client: &FleetClient) -> Result<()> {
    match client.list_networks().await {
        Ok(networks) => {
            for n in networks {
                println!("{:<36} {:<12} {:?} vni={}", n.id, n.name, n.network_type, n.vni);
            }
        }
        Err(e) => {
            eprintln!("✗ Failed to list networks: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_create_subnet(client: &FleetClient, args: &CreateSubnetArgs) -> Result<()> {
    let cidr: ipnet::Ipv4Net = args.cidr.parse().map_err(|e| anyhow::anyhow!("invalid CIDR '{}': {e}", args.cidr))?;
    match client.create_subnet(args.network_id.clone(), cidr, args.gateway_ip, args.dhcp).await {
        Ok(subnet) => println!("✓ Subnet created: {} ({})", subnet.id, subnet.cidr),
        Err(e) => {
            eprintln!("✗ Failed to create subnet: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_list_subnets(client: &FleetClient, args: &ListSubnetsArgs) -> Result<()> {
    match client.list_subnets(args.network_id.clone()).await {
        Ok(subnets) => {
            for s in subnets {
                println!("{:<36} {:<20} network={}", s.id, s.cidr, s.network_id);
            }
        }
        Err(e) => {
            eprintln!("✗ Failed to list subnets: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_delete_subnet(client: &FleetClient, args: &SubnetIdArgs) -> Result<()> {
    match client.delete_subnet(&args.subnet_id).await {
        Ok(()) => println!("✓ Subnet {} deleted", args.subnet_id),
        Err(e) => {
            eprintln!("✗ Failed to delete subnet {}: {e}", args.subnet_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_allocate_ip(client: &FleetClient, args: &AllocateIpArgs) -> Result<()> {
    match client
        .allocate_ip(
            &args.subnet_id,
            args.ip,
            args.instance_id.clone(),
            args.port_id.clone(),
            args.hostname.clone(),
            args.mac.clone(),
        )
        .await
    {
        Ok(allocation) => println!("✓ Allocated {}", allocation.ip_address),
        Err(e) => {
            eprintln!("✗ Failed to allocate IP in subnet {}: {e}", args.subnet_id);
            if e.to_string().contains("exhausted") {
                eprintln!("  → No free addresses remain in this subnet's pool");
            }
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_release_ip(client: &FleetClient, args: &ReleaseIpArgs) -> Result<()> {
    match client.release_ip(&args.subnet_id, args.ip).await {
        Ok(()) => println!("✓ Released {}", args.ip),
        Err(e) => {
            eprintln!("✗ Failed to release {} in subnet {}: {e}", args.ip, args.subnet_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_list_allocations(client: &FleetClient, args: &SubnetIdArgs) -> Result<()> {
    match client.list_allocations(&args.subnet_id).await {
        Ok(allocations) => {
            for a in allocations {
                println!("{:<18} {:?} instance={:?}", a.ip_address, a.status, a.instance_id);
            }
        }
        Err(e) => {
            eprintln!("✗ Failed to list allocations for subnet {}: {e}", args.subnet_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn execute_list_vteps(client: &FleetClient) -> Result<()> {
    match client.list_vteps().await {
        Ok(vteps) => {
            for v in vteps {
                println!("{:<20} {} {:?}", v.node_id, v.ip, v.status);
            }
        }
        Err(e) => {
            eprintln!("✗ Failed to list VTEPs: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
