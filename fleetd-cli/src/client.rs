//! HTTP client for the orchestrator's `ClusterService` / `ComputeService` /
//! `NetworkService` REST surface. Talks to the control plane over the wire
//! only — it does not link against the orchestrator binary, so its request
//! bodies are defined here rather than imported from it.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use fleetd_core::instance::{Instance, InstanceType};
use fleetd_core::network::{IpAllocation, Network, NetworkType, Subnet, Vtep};
use fleetd_core::node::{Node, Resources};
use fleetd_core::pagination::PageResponse;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct RegisterNodeRequest {
    hostname: String,
    ip: String,
    port: u16,
    region: String,
    zone: String,
    capacity: Resources,
    supported_instance_types: HashSet<InstanceType>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterNodeResponse {
    pub node_id: String,
    pub heartbeat_interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct ClusterInfo {
    pub node_count: usize,
    pub ready_node_count: usize,
    pub instance_count: usize,
}

#[derive(Debug, Serialize)]
struct CreateInstanceRequest {
    name: String,
    #[serde(rename = "type")]
    instance_type: InstanceType,
    spec: fleetd_core::instance::InstanceSpec,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preferred_node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    zone: Option<String>,
}

#[derive(Debug, Serialize, Default)]
struct StopRequest {
    force: bool,
}

#[derive(Debug, Deserialize)]
pub struct InstanceStats {
    pub cpu_usage_percent: f64,
    pub memory_bytes_used: u64,
    pub disk_bytes_used: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

#[derive(Debug, Serialize)]
struct CreateNetworkRequest {
    name: String,
    network_type: NetworkType,
    vni: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    vlan_id: Option<u16>,
    mtu: u32,
}

#[derive(Debug, Serialize)]
struct CreateSubnetRequest {
    network_id: String,
    cidr: ipnet::Ipv4Net,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway_ip: Option<Ipv4Addr>,
    dhcp: bool,
    dns: Vec<Ipv4Addr>,
    allocation_pools: Vec<fleetd_core::network::AllocationPool>,
}

#[derive(Debug, Serialize, Default)]
struct AllocateIpRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mac: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReleaseIpRequest {
    ip: Ipv4Addr,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Thin REST client over the control plane's HTTP surface.
pub struct FleetClient {
    base_url: String,
    http: Client,
}

impl FleetClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn decode<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            resp.json::<T>().await.context("decoding response body")
        } else {
            let body = resp.json::<ErrorBody>().await.map(|b| b.error).unwrap_or_else(|_| status.to_string());
            Err(anyhow!("server returned {status}: {body}"))
        }
    }

    pub async fn cluster_info(&self) -> Result<ClusterInfo> {
        let resp = self.http.get(format!("{}/cluster/info", self.base_url)).send().await?;
        Self::decode(resp).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn register_node(
        &self,
        hostname: String,
        ip: String,
        port: u16,
        region: String,
        zone: String,
        capacity: Resources,
        supported_instance_types: HashSet<InstanceType>,
    ) -> Result<RegisterNodeResponse> {
        let resp = self
            .http
            .post(format!("{}/cluster/nodes", self.base_url))
            .json(&RegisterNodeRequest { hostname, ip, port, region, zone, capacity, supported_instance_types })
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn get_node(&self, id: &str) -> Result<Node> {
        let resp = self.http.get(format!("{}/cluster/nodes/{id}", self.base_url)).send().await?;
        Self::decode(resp).await
    }

    pub async fn list_nodes(&self, page_size: Option<u32>, page_token: Option<String>) -> Result<PageResponse<Node>> {
        let mut req = self.http.get(format!("{}/cluster/nodes", self.base_url));
        if let Some(s) = page_size {
            req = req.query(&[("page_size", s)]);
        }
        if let Some(t) = page_token {
            req = req.query(&[("page_token", t)]);
        }
        Self::decode(req.send().await?).await
    }

    pub async fn deregister_node(&self, id: &str) -> Result<()> {
        let resp = self.http.delete(format!("{}/cluster/nodes/{id}", self.base_url)).send().await?;
        if resp.status() == StatusCode::NO_CONTENT || resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.json::<ErrorBody>().await.map(|b| b.error).unwrap_or_else(|_| status.to_string());
            Err(anyhow!("server returned {status}: {body}"))
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_instance(
        &self,
        name: String,
        instance_type: InstanceType,
        spec: fleetd_core::instance::InstanceSpec,
        metadata: HashMap<String, String>,
        preferred_node_id: Option<String>,
        region: Option<String>,
        zone: Option<String>,
    ) -> Result<Instance> {
        let resp = self
            .http
            .post(format!("{}/compute/instances", self.base_url))
            .json(&CreateInstanceRequest { name, instance_type, spec, metadata, preferred_node_id, region, zone })
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn get_instance(&self, id: &str) -> Result<Instance> {
        let resp = self.http.get(format!("{}/compute/instances/{id}", self.base_url)).send().await?;
        Self::decode(resp).await
    }

    pub async fn list_instances(
        &self,
        page_size: Option<u32>,
        page_token: Option<String>,
    ) -> Result<PageResponse<Instance>> {
        let mut req = self.http.get(format!("{}/compute/instances", self.base_url));
        if let Some(s) = page_size {
            req = req.query(&[("page_size", s)]);
        }
        if let Some(t) = page_token {
            req = req.query(&[("page_token", t)]);
        }
        Self::decode(req.send().await?).await
    }

    pub async fn delete_instance(&self, id: &str, force: bool) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{}/compute/instances/{id}", self.base_url))
            .query(&[("force", force)])
            .send()
            .await?;
        if resp.status() == StatusCode::NO_CONTENT || resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.json::<ErrorBody>().await.map(|b| b.error).unwrap_or_else(|_| status.to_string());
            Err(anyhow!("server returned {status}: {body}"))
        }
    }

    pub async fn start_instance(&self, id: &str) -> Result<Instance> {
        let resp = self.http.post(format!("{}/compute/instances/{id}/start", self.base_url)).send().await?;
        Self::decode(resp).await
    }

    pub async fn stop_instance(&self, id: &str, force: bool) -> Result<Instance> {
        let resp = self
            .http
            .post(format!("{}/compute/instances/{id}/stop", self.base_url))
            .json(&StopRequest { force })
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn restart_instance(&self, id: &str, force: bool) -> Result<Instance> {
        let resp = self
            .http
            .post(format!("{}/compute/instances/{id}/restart", self.base_url))
            .json(&StopRequest { force })
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn instance_stats(&self, id: &str) -> Result<InstanceStats> {
        let resp = self.http.get(format!("{}/compute/instances/{id}/stats", self.base_url)).send().await?;
        Self::decode(resp).await
    }

    pub async fn create_network(
        &self,
        name: String,
        network_type: NetworkType,
        vni: u32,
        vlan_id: Option<u16>,
        mtu: u32,
    ) -> Result<Network> {
        let resp = self
            .http
            .post(format!("{}/network/networks", self.base_url))
            .json(&CreateNetworkRequest { name, network_type, vni, vlan_id, mtu })
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn get_network(&self, id: &str) -> Result<Network> {
        let resp = self.http.get(format!("{}/network/networks/{id}", self.base_url)).send().await?;
        Self::decode(resp).await
    }

    pub async fn list_networks(&self) -> Result<Vec<Network>> {
        let resp = self.http.get(format!("{}/network/networks", self.base_url)).send().await?;
        Self::decode(resp).await
    }

    pub async fn create_subnet(
        &self,
        network_id: String,
        cidr: ipnet::Ipv4Net,
        gateway_ip: Option<Ipv4Addr>,
        dhcp: bool,
    ) -> Result<Subnet> {
        let resp = self
            .http
            .post(format!("{}/network/subnets", self.base_url))
            .json(&CreateSubnetRequest {
                network_id,
                cidr,
                gateway_ip,
                dhcp,
                dns: Vec::new(),
                allocation_pools: Vec::new(),
            })
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn get_subnet(&self, id: &str) -> Result<Subnet> {
        let resp = self.http.get(format!("{}/network/subnets/{id}", self.base_url)).send().await?;
        Self::decode(resp).await
    }

    pub async fn list_subnets(&self, network_id: Option<String>) -> Result<Vec<Subnet>> {
        let mut req = self.http.get(format!("{}/network/subnets", self.base_url));
        if let Some(n) = network_id {
            req = req.query(&[("network_id", n)]);
        }
        Self::decode(req.send().await?).await
    }

    pub async fn delete_subnet(&self, id: &str) -> Result<()> {
        let resp = self.http.delete(format!("{}/network/subnets/{id}", self.base_url)).send().await?;
        if resp.status() == StatusCode::NO_CONTENT || resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.json::<ErrorBody>().await.map(|b| b.error).unwrap_or_else(|_| status.to_string());
            Err(anyhow!("server returned {status}: {body}"))
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn allocate_ip(
        &self,
        subnet_id: &str,
        ip: Option<Ipv4Addr>,
        instance_id: Option<String>,
        port_id: Option<String>,
        hostname: Option<String>,
        mac: Option<String>,
    ) -> Result<IpAllocation> {
        let resp = self
            .http
            .post(format!("{}/network/subnets/{subnet_id}/allocate", self.base_url))
            .json(&AllocateIpRequest { ip, instance_id, port_id, hostname, mac })
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn release_ip(&self, subnet_id: &str, ip: Ipv4Addr) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/network/subnets/{subnet_id}/release", self.base_url))
            .json(&ReleaseIpRequest { ip })
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.json::<ErrorBody>().await.map(|b| b.error).unwrap_or_else(|_| status.to_string());
            Err(anyhow!("server returned {status}: {body}"))
        }
    }

    pub async fn list_allocations(&self, subnet_id: &str) -> Result<Vec<IpAllocation>> {
        let resp = self.http.get(format!("{}/network/subnets/{subnet_id}/allocations", self.base_url)).send().await?;
        Self::decode(resp).await
    }

    pub async fn list_vteps(&self) -> Result<Vec<Vtep>> {
        let resp = self.http.get(format!("{}/network/vteps", self.base_url)).send().await?;
        Self::decode(resp).await
    }
}
