//! Argument structs for every subcommand, one per functional domain.

use std::net::Ipv4Addr;

use clap::Args;

#[derive(Debug, Args)]
pub struct RegisterNodeArgs {
    /// Hostname to advertise for this node.
    #[arg(long)]
    pub hostname: String,
    /// IP address the agent's RPC surface listens on.
    #[arg(long)]
    pub ip: String,
    /// Port the agent's RPC surface listens on.
    #[arg(long)]
    pub port: u16,
    #[arg(long, default_value = "default")]
    pub region: String,
    #[arg(long, default_value = "default")]
    pub zone: String,
    #[arg(long)]
    pub cpu_cores: u32,
    #[arg(long)]
    pub memory_bytes: u64,
    #[arg(long)]
    pub disk_bytes: u64,
    #[arg(long, default_value_t = 0)]
    pub gpu_count: u32,
    /// Instance types this node can host, e.g. "Container,Vm".
    #[arg(long, value_delimiter = ',', default_value = "Container")]
    pub instance_types: Vec<String>,
}

#[derive(Debug, Args)]
pub struct NodeIdArgs {
    pub node_id: String,
}

#[derive(Debug, Args)]
pub struct ListNodesArgs {
    #[arg(long)]
    pub page_size: Option<u32>,
    #[arg(long)]
    pub page_token: Option<String>,
}

#[derive(Debug, Args)]
pub struct CreateInstanceArgs {
    #[arg(long)]
    pub name: String,
    /// "Vm", "Container", or "Microvm".
    #[arg(long, default_value = "Container")]
    pub r#type: String,
    #[arg(long)]
    pub image: String,
    #[arg(long)]
    pub cpu_cores: u32,
    #[arg(long)]
    pub memory_bytes: u64,
    #[arg(long, default_value_t = 0)]
    pub disk_bytes: u64,
    /// Shell-split command override, e.g. --command "/bin/sh -c sleep 1".
    #[arg(long)]
    pub command: Option<String>,
    /// Inline JSON object, or `@file.json`, merged into instance metadata.
    #[arg(long)]
    pub metadata: Option<String>,
    #[arg(long)]
    pub preferred_node_id: Option<String>,
    #[arg(long)]
    pub region: Option<String>,
    #[arg(long)]
    pub zone: Option<String>,
}

#[derive(Debug, Args)]
pub struct InstanceIdArgs {
    pub instance_id: String,
}

#[derive(Debug, Args)]
pub struct DeleteInstanceArgs {
    pub instance_id: String,
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct StopInstanceArgs {
    pub instance_id: String,
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct ListInstancesArgs {
    #[arg(long)]
    pub page_size: Option<u32>,
    #[arg(long)]
    pub page_token: Option<String>,
}

#[derive(Debug, Args)]
pub struct CreateNetworkArgs {
    #[arg(long)]
    pub name: String,
    /// "Vxlan", "Vlan", or "Flat".
    #[arg(long, default_value = "Vxlan")]
    pub network_type: String,
    #[arg(long)]
    pub vni: u32,
    #[arg(long)]
    pub vlan_id: Option<u16>,
    #[arg(long, default_value_t = 1450)]
    pub mtu: u32,
}

#[derive(Debug, Args)]
pub struct NetworkIdArgs {
    pub network_id: String,
}

#[derive(Debug, Args)]
pub struct CreateSubnetArgs {
    #[arg(long)]
    pub network_id: String,
    /// CIDR, e.g. "10.10.0.0/24".
    #[arg(long)]
    pub cidr: String,
    #[arg(long)]
    pub gateway_ip: Option<Ipv4Addr>,
    #[arg(long)]
    pub dhcp: bool,
}

#[derive(Debug, Args)]
pub struct SubnetIdArgs {
    pub subnet_id: String,
}

#[derive(Debug, Args)]
pub struct ListSubnetsArgs {
    #[arg(long)]
    pub network_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct AllocateIpArgs {
    pub subnet_id: String,
    #[arg(long)]
    pub ip: Option<Ipv4Addr>,
    #[arg(long)]
    pub instance_id: Option<String>,
    #[arg(long)]
    pub port_id: Option<String>,
    #[arg(long)]
    pub hostname: Option<String>,
    #[arg(long)]
    pub mac: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReleaseIpArgs {
    pub subnet_id: String,
    pub ip: Ipv4Addr,
}
