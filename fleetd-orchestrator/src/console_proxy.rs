//! `AttachConsole` proxy (§4.I, §9.1): the orchestrator looks up the owning
//! node's agent address and bridges the caller's WebSocket to the agent's
//! console WebSocket, rather than handing the agent address back to the
//! caller — the orchestrator stays the single entry point external
//! collaborators (CLI, REST gateway) need to know.

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use fleetd_core::InstanceId;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::warn;

use crate::agent_client::AgentClient;
use crate::state::AppState;

pub async fn attach_console(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| proxy(socket, state, InstanceId(id)))
}

async fn proxy(mut socket: WebSocket, state: AppState, id: InstanceId) {
    let instance = match state.registry.get_instance(&id).await {
        Ok(Some(i)) => i,
        _ => {
            let _ = socket
                .send(AxumMessage::Text(
                    serde_json::json!({"error": "instance not found"}).to_string(),
                ))
                .await;
            return;
        }
    };
    let node = match instance.node_id {
        Some(node_id) => match state.registry.get_node(&node_id).await {
            Ok(Some(n)) => n,
            _ => {
                let _ = socket
                    .send(AxumMessage::Text(
                        serde_json::json!({"error": "owning node not found"}).to_string(),
                    ))
                    .await;
                return;
            }
        },
        None => {
            let _ = socket
                .send(AxumMessage::Text(
                    serde_json::json!({"error": "instance has no assigned node"}).to_string(),
                ))
                .await;
            return;
        }
    };

    let agent_url = AgentClient::console_ws_url(&node, &id);
    let (agent_stream, _) = match tokio_tungstenite::connect_async(&agent_url).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, url = %agent_url, "failed to connect to agent console");
            let _ = socket
                .send(AxumMessage::Text(
                    serde_json::json!({"error": format!("agent console unreachable: {e}")}).to_string(),
                ))
                .await;
            return;
        }
    };

    let (mut agent_tx, mut agent_rx) = agent_stream.split();
    let (mut client_tx, mut client_rx) = socket.split();

    let mut to_agent = tokio::spawn(async move {
        while let Some(Ok(msg)) = client_rx.next().await {
            let forwarded = match msg {
                AxumMessage::Text(t) => TungsteniteMessage::Text(t),
                AxumMessage::Binary(b) => TungsteniteMessage::Binary(b),
                AxumMessage::Close(_) => break,
                _ => continue,
            };
            if agent_tx.send(forwarded).await.is_err() {
                break;
            }
        }
    });

    let mut from_agent = tokio::spawn(async move {
        while let Some(Ok(msg)) = agent_rx.next().await {
            let forwarded = match msg {
                TungsteniteMessage::Text(t) => AxumMessage::Text(t),
                TungsteniteMessage::Binary(b) => AxumMessage::Binary(b),
                TungsteniteMessage::Close(_) => break,
                _ => continue,
            };
            if client_tx.send(forwarded).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut to_agent => { from_agent.abort(); }
        _ = &mut from_agent => { to_agent.abort(); }
    }
}
