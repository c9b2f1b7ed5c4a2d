//! Exercises §8's "schedule-a-container", "exhaust-and-fail", and
//! "IP-round-trip" scenarios against real bound sockets: a real orchestrator
//! in front of a real (simulated-driver) agent, driven over HTTP by `reqwest`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleetd_core::instance::{DiskSpec, InstanceSpec};
use fleetd_core::node::Resources;
use fleetd_core::NodeId;
use fleetd_driver::ContainerRuntimeDriver;
use fleetd_ipam::Ipam;
use fleetd_orchestrator::agent_client::AgentClient;
use fleetd_orchestrator::AppState;
use fleetd_registry::Registry;
use fleetd_store::LocalStore;
use serde_json::{json, Value};

async fn spawn_agent() -> String {
    let state = fleetd_agent::AppState {
        driver: Arc::new(ContainerRuntimeDriver::new()),
        registry: Registry::new(LocalStore::new()),
        node_id: NodeId("agent-under-test".into()),
    };
    let app = fleetd_agent::api::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("{}:{}", addr.ip(), addr.port())
}

async fn spawn_orchestrator() -> String {
    let registry = Registry::new(LocalStore::new());
    let ipam = Arc::new(Ipam::new(registry.clone()));
    let agents = AgentClient::new(Duration::from_secs(5)).unwrap();
    let state = AppState::new(registry, ipam, agents).await.unwrap();
    let app = fleetd_orchestrator::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn container_spec(cpu: u32) -> InstanceSpec {
    InstanceSpec {
        image_ref: "alpine:latest".into(),
        cpu_cores: cpu,
        memory_bytes: 128 * 1024 * 1024,
        disks: vec![DiskSpec { size_bytes: 512 * 1024 * 1024, source_image: None }],
        command: vec!["/bin/sh".into()],
        env: HashMap::new(),
        kernel: None,
        initrd: None,
        network: None,
        limits: Resources::default(),
    }
}

/// Registers a node pointed at `agent_addr` with `cpu_cores` capacity and
/// brings it to `ready` via a heartbeat, returning its orchestrator-assigned id.
async fn register_ready_node(client: &reqwest::Client, base: &str, agent_addr: &str, cpu_cores: u32) -> String {
    let (ip, port) = agent_addr.split_once(':').unwrap();
    let resp = client
        .post(format!("{base}/cluster/nodes"))
        .json(&json!({
            "hostname": "worker-1",
            "ip": ip,
            "port": port.parse::<u16>().unwrap(),
            "region": "r1",
            "zone": "z1",
            "capacity": {
                "cpu_cores": cpu_cores,
                "memory_bytes": 8u64 * 1024 * 1024 * 1024,
                "disk_bytes": 100u64 * 1024 * 1024 * 1024,
                "gpu_count": 0,
            },
            "supported_instance_types": ["Container"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let node_id = body["node_id"].as_str().unwrap().to_string();

    let hb = client
        .post(format!("{base}/cluster/nodes/{node_id}/heartbeat"))
        .json(&json!({
            "status": "Ready",
            "allocated": {"cpu_cores": 0, "memory_bytes": 0, "disk_bytes": 0, "gpu_count": 0},
            "conditions": [],
            "lease_ttl_seconds": 30,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(hb.status(), 200);
    node_id
}

#[tokio::test]
async fn schedules_instance_onto_ready_node() {
    let agent_addr = spawn_agent().await;
    let base = spawn_orchestrator().await;
    let client = reqwest::Client::new();

    let node_id = register_ready_node(&client, &base, &agent_addr, 4).await;

    let resp = client
        .post(format!("{base}/compute/instances"))
        .json(&json!({"name": "web-1", "type": "Container", "spec": container_spec(1)}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let instance: Value = resp.json().await.unwrap();
    assert_eq!(instance["state"], "Creating");
    assert_eq!(instance["node_id"], node_id);
}

#[tokio::test]
async fn exhausted_capacity_fails_closed_instead_of_erroring() {
    let agent_addr = spawn_agent().await;
    let base = spawn_orchestrator().await;
    let client = reqwest::Client::new();

    register_ready_node(&client, &base, &agent_addr, 1).await;

    let first = client
        .post(format!("{base}/compute/instances"))
        .json(&json!({"name": "a", "type": "Container", "spec": container_spec(1)}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    let first_body: Value = first.json().await.unwrap();
    assert_eq!(first_body["state"], "Creating");

    let second = client
        .post(format!("{base}/compute/instances"))
        .json(&json!({"name": "b", "type": "Container", "spec": container_spec(1)}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 200);
    let second_body: Value = second.json().await.unwrap();
    assert_eq!(second_body["state"], "Failed");
}

#[tokio::test]
async fn ip_allocate_and_release_round_trips() {
    let base = spawn_orchestrator().await;
    let client = reqwest::Client::new();

    let network: Value = client
        .post(format!("{base}/network/networks"))
        .json(&json!({"name": "tenant-net", "network_type": "Vxlan", "vni": 100}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let network_id = network["id"].as_str().unwrap().to_string();

    let subnet: Value = client
        .post(format!("{base}/network/subnets"))
        .json(&json!({
            "network_id": network_id,
            "cidr": "10.10.0.0/24",
            "gateway_ip": "10.10.0.1",
            "dhcp": true,
            "dns": [],
            "allocation_pools": [],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let subnet_id = subnet["id"].as_str().unwrap().to_string();

    let allocation: Value = client
        .post(format!("{base}/network/subnets/{subnet_id}/allocate"))
        .json(&json!({"instance_id": "i-1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ip = allocation["ip_address"].as_str().unwrap().to_string();
    assert!(ip.starts_with("10.10.0."));

    let allocations: Vec<Value> = client
        .get(format!("{base}/network/subnets/{subnet_id}/allocations"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(allocations.len(), 1);

    let release = client
        .post(format!("{base}/network/subnets/{subnet_id}/release"))
        .json(&json!({"ip": ip}))
        .send()
        .await
        .unwrap();
    assert_eq!(release.status(), 200);

    let allocations_after: Vec<Value> = client
        .get(format!("{base}/network/subnets/{subnet_id}/allocations"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(allocations_after.is_empty());
}

#[tokio::test]
async fn node_register_heartbeat_watch_reflects_state() {
    let base = spawn_orchestrator().await;
    let client = reqwest::Client::new();

    let register: Value = client
        .post(format!("{base}/cluster/nodes"))
        .json(&json!({
            "hostname": "worker-2",
            "ip": "127.0.0.1",
            "port": 7200,
            "region": "r1",
            "zone": "z1",
            "capacity": {"cpu_cores": 2, "memory_bytes": 1024, "disk_bytes": 1024, "gpu_count": 0},
            "supported_instance_types": [],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let node_id = register["node_id"].as_str().unwrap().to_string();

    let info: Value = client.get(format!("{base}/cluster/info")).send().await.unwrap().json().await.unwrap();
    assert_eq!(info["node_count"], 1);
    assert_eq!(info["ready_node_count"], 0);

    let hb = client
        .post(format!("{base}/cluster/nodes/{node_id}/heartbeat"))
        .json(&json!({
            "status": "Ready",
            "allocated": {"cpu_cores": 0, "memory_bytes": 0, "disk_bytes": 0, "gpu_count": 0},
            "conditions": [],
            "lease_ttl_seconds": 30,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(hb.status(), 200);

    let info_after: Value = client.get(format!("{base}/cluster/info")).send().await.unwrap().json().await.unwrap();
    assert_eq!(info_after["ready_node_count"], 1);
}

#[tokio::test]
async fn deleting_instance_twice_succeeds_both_times() {
    let agent_addr = spawn_agent().await;
    let base = spawn_orchestrator().await;
    let client = reqwest::Client::new();

    register_ready_node(&client, &base, &agent_addr, 4).await;

    let created: Value = client
        .post(format!("{base}/compute/instances"))
        .json(&json!({"name": "web-1", "type": "Container", "spec": container_spec(1)}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let instance_id = created["id"].as_str().unwrap().to_string();

    let first_delete = client
        .delete(format!("{base}/compute/instances/{instance_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(first_delete.status(), 200);

    let second_delete = client
        .delete(format!("{base}/compute/instances/{instance_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(second_delete.status(), 200);
}

#[tokio::test]
async fn slash_31_subnet_allocate_returns_resource_exhausted() {
    let base = spawn_orchestrator().await;
    let client = reqwest::Client::new();

    let network: Value = client
        .post(format!("{base}/network/networks"))
        .json(&json!({"name": "tiny-net", "network_type": "Vxlan", "vni": 101}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let network_id = network["id"].as_str().unwrap().to_string();

    let subnet_resp = client
        .post(format!("{base}/network/subnets"))
        .json(&json!({
            "network_id": network_id,
            "cidr": "10.20.0.0/31",
            "gateway_ip": null,
            "dhcp": false,
            "dns": [],
            "allocation_pools": [],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(subnet_resp.status(), 200);
    let subnet: Value = subnet_resp.json().await.unwrap();
    let subnet_id = subnet["id"].as_str().unwrap().to_string();

    let allocate_resp = client
        .post(format!("{base}/network/subnets/{subnet_id}/allocate"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(allocate_resp.status(), 507);
}
