//! End-to-end exercise of the agent's HTTP surface against a real bound
//! socket (§8: "schedule-a-container", "console-round-trip" touch only the
//! agent's own boundary here; full placement is exercised at the
//! orchestrator level).

use std::collections::HashMap;
use std::sync::Arc;

use fleetd_agent::{api, AppState};
use fleetd_core::instance::{DiskSpec, InstanceSpec, InstanceType};
use fleetd_core::node::Resources;
use fleetd_core::NodeId;
use fleetd_driver::ContainerRuntimeDriver;
use fleetd_registry::Registry;
use fleetd_store::LocalStore;
use serde_json::json;

async fn spawn_agent() -> String {
    let state = AppState {
        driver: Arc::new(ContainerRuntimeDriver::new()),
        registry: Registry::new(LocalStore::new()),
        node_id: NodeId("test-node".into()),
    };
    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn container_spec() -> InstanceSpec {
    InstanceSpec {
        image_ref: "alpine:latest".into(),
        cpu_cores: 1,
        memory_bytes: 256 * 1024 * 1024,
        disks: vec![DiskSpec { size_bytes: 1024 * 1024 * 1024, source_image: None }],
        command: vec!["/bin/sh".into()],
        env: HashMap::new(),
        kernel: None,
        initrd: None,
        network: None,
        limits: Resources::default(),
    }
}

#[tokio::test]
async fn create_start_stats_delete_round_trip() {
    let base = spawn_agent().await;
    let client = reqwest::Client::new();

    let create_resp = client
        .post(format!("{base}/instances"))
        .json(&json!({
            "name": "web-1",
            "type": "Container",
            "spec": container_spec(),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(create_resp.status(), 200);
    let instance: serde_json::Value = create_resp.json().await.unwrap();
    let id = instance["id"].as_str().unwrap().to_string();
    assert_eq!(instance["state"], "Stopped");

    let start_resp = client
        .post(format!("{base}/instances/{id}/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(start_resp.status(), 200);
    let started: serde_json::Value = start_resp.json().await.unwrap();
    assert_eq!(started["state"], "Running");

    let stats_resp = client.get(format!("{base}/instances/{id}/stats")).send().await.unwrap();
    assert_eq!(stats_resp.status(), 200);

    let delete_resp = client.delete(format!("{base}/instances/{id}")).send().await.unwrap();
    assert_eq!(delete_resp.status(), 204);

    let get_resp = client.get(format!("{base}/instances/{id}")).send().await.unwrap();
    assert_eq!(get_resp.status(), 404);
}

#[tokio::test]
async fn create_with_zero_resources_is_bad_request() {
    let base = spawn_agent().await;
    let client = reqwest::Client::new();

    let mut spec = container_spec();
    spec.cpu_cores = 0;

    let resp = client
        .post(format!("{base}/instances"))
        .json(&json!({"name": "bad", "type": "Container", "spec": spec}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
