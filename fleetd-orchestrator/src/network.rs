//! `NetworkService` (§4.I): network/subnet/VTEP CRUD and the IPAM
//! allocate/release operations that back tenant IP assignment. Security
//! group, router, and floating-IP CRUD are named in the external surface
//! but have no backing entity in the data model (§3 only defines
//! `SecurityGroupRule` as an attachment shape, not a standalone resource) —
//! left to the enforcement layer these rules attach to, which is out of
//! scope here.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use fleetd_core::network::{AllocationPool, Network, NetworkStatus, NetworkType, Vtep};
use fleetd_core::{ClusterError, ClusterResult};
use fleetd_ipam::AllocateOptions;
use serde::Deserialize;
use std::net::Ipv4Addr;
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/network/networks", post(create_network).get(list_networks))
        .route("/network/networks/:id", get(get_network))
        .route("/network/subnets", post(create_subnet).get(list_subnets))
        .route("/network/subnets/:id", get(get_subnet).delete(delete_subnet))
        .route("/network/subnets/:id/allocate", post(allocate_ip))
        .route("/network/subnets/:id/release", post(release_ip))
        .route("/network/subnets/:id/allocations", get(list_allocations))
        .route("/network/vteps", get(list_vteps))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateNetworkRequest {
    pub name: String,
    pub network_type: NetworkType,
    pub vni: u32,
    pub vlan_id: Option<u16>,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
}

fn default_mtu() -> u32 {
    1450
}

async fn create_network(
    State(state): State<AppState>,
    Json(req): Json<CreateNetworkRequest>,
) -> Result<Json<Network>, ApiError> {
    validate_vni(req.vni)?;
    let network = Network {
        schema_version: 1,
        id: Uuid::new_v4().to_string(),
        name: req.name,
        network_type: req.network_type,
        vni: req.vni,
        vlan_id: req.vlan_id,
        mtu: req.mtu,
        status: NetworkStatus::Active,
        subnet_ids: Vec::new(),
        created_at: chrono::Utc::now(),
    };
    let created = state.registry.create_network_if_absent(&network).await?;
    if !created {
        return Err(ClusterError::already_exists(format!("network {} already exists", network.id)).into());
    }
    Ok(Json(network))
}

fn validate_vni(vni: u32) -> ClusterResult<()> {
    if !(fleetd_core::network::VNI_MIN..=fleetd_core::network::VNI_MAX).contains(&vni) {
        return Err(ClusterError::invalid_argument(format!(
            "vni {vni} out of range [{}, {}]",
            fleetd_core::network::VNI_MIN,
            fleetd_core::network::VNI_MAX
        )));
    }
    Ok(())
}

async fn get_network(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Network>, ApiError> {
    let network = state
        .registry
        .get_network(&id)
        .await?
        .ok_or_else(|| ClusterError::not_found(format!("network {id}")))?;
    Ok(Json(network))
}

async fn list_networks(State(state): State<AppState>) -> Result<Json<Vec<Network>>, ApiError> {
    Ok(Json(state.registry.list_networks().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubnetRequest {
    pub network_id: String,
    pub cidr: ipnet::Ipv4Net,
    pub gateway_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub dhcp: bool,
    #[serde(default)]
    pub dns: Vec<Ipv4Addr>,
    #[serde(default)]
    pub allocation_pools: Vec<AllocationPool>,
}

async fn create_subnet(
    State(state): State<AppState>,
    Json(req): Json<CreateSubnetRequest>,
) -> Result<Json<fleetd_core::network::Subnet>, ApiError> {
    let subnet = state
        .ipam
        .create_subnet(
            &req.network_id,
            req.cidr,
            req.gateway_ip,
            req.dhcp,
            req.dns,
            req.allocation_pools,
        )
        .await?;
    Ok(Json(subnet))
}

async fn get_subnet(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<fleetd_core::network::Subnet>, ApiError> {
    let subnets = state.ipam.list_subnets(None).await?;
    let subnet = subnets
        .into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| ClusterError::not_found(format!("subnet {id}")))?;
    Ok(Json(subnet))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListSubnetsQuery {
    pub network_id: Option<String>,
}

async fn list_subnets(
    State(state): State<AppState>,
    Query(q): Query<ListSubnetsQuery>,
) -> Result<Json<Vec<fleetd_core::network::Subnet>>, ApiError> {
    Ok(Json(state.ipam.list_subnets(q.network_id.as_deref()).await?))
}

async fn delete_subnet(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), ApiError> {
    state.ipam.delete_subnet(&id).await?;
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
pub struct AllocateIpRequest {
    pub ip: Option<Ipv4Addr>,
    pub instance_id: Option<String>,
    pub port_id: Option<String>,
    pub hostname: Option<String>,
    pub mac: Option<String>,
}

async fn allocate_ip(
    State(state): State<AppState>,
    Path(subnet_id): Path<String>,
    Json(req): Json<AllocateIpRequest>,
) -> Result<Json<fleetd_core::network::IpAllocation>, ApiError> {
    let allocation = state
        .ipam
        .allocate_ip(
            &subnet_id,
            AllocateOptions {
                ip: req.ip,
                instance_id: req.instance_id,
                port_id: req.port_id,
                hostname: req.hostname,
                mac: req.mac,
            },
        )
        .await?;
    Ok(Json(allocation))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseIpRequest {
    pub ip: Ipv4Addr,
}

async fn release_ip(
    State(state): State<AppState>,
    Path(subnet_id): Path<String>,
    Json(req): Json<ReleaseIpRequest>,
) -> Result<(), ApiError> {
    state.ipam.release_ip(&subnet_id, req.ip).await?;
    Ok(())
}

async fn list_allocations(
    State(state): State<AppState>,
    Path(subnet_id): Path<String>,
) -> Result<Json<Vec<fleetd_core::network::IpAllocation>>, ApiError> {
    Ok(Json(state.ipam.list_allocations(&subnet_id).await?))
}

async fn list_vteps(State(state): State<AppState>) -> Result<Json<Vec<Vtep>>, ApiError> {
    Ok(Json(state.registry.list_vteps().await?))
}
