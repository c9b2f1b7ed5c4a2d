//! `AttachConsole` as a WebSocket upgrade (§4.H.1): bridges one driver
//! console session per connection rather than fanning a shared event
//! broadcast out to many clients.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use fleetd_core::InstanceId;
use fleetd_driver::{AttachOptions, ConsoleMessage};
use futures::{SinkExt, StreamExt};
use tracing::warn;

pub async fn attach_console(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, InstanceId(id)))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, id: InstanceId) {
    let session = match state
        .driver
        .attach(
            &id,
            AttachOptions {
                tty: true,
                cols: 80,
                rows: 24,
            },
        )
        .await
    {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, instance_id = %id, "console attach failed");
            let _ = socket
                .send(Message::Text(
                    serde_json::json!({"error": e.to_string()}).to_string(),
                ))
                .await;
            return;
        }
    };

    let fleetd_driver::ConsoleSession {
        input,
        mut output,
    } = session;

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut outbound = tokio::spawn(async move {
        while let Some(bytes) = output.recv().await {
            let frame = ConsoleMessage::Data { bytes };
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(parsed) = serde_json::from_str::<ConsoleMessage>(&text) else {
                continue;
            };
            if input.send(parsed).await.is_err() {
                break;
            }
        }
    });

    // Closing either half terminates the session (§4.H): whichever task
    // finishes first, abort the other.
    tokio::select! {
        _ = &mut outbound => { inbound.abort(); }
        _ = &mut inbound => { outbound.abort(); }
    }
}
