//! `WatchNodes`/`WatchInstance` as Server-Sent-Event streams (§4.I.1): fed
//! from the same `watch_prefix`-backed `EntityEvent` translation the
//! internal watch trait already produces, so the replay-then-live and
//! dedup-by-key behavior only needs to exist once.

use std::convert::Infallible;

use axum::response::sse::Event;
use fleetd_core::InstanceId;
use fleetd_registry::{keys, EntityEvent, EventKind, Registry};
use fleetd_store::ReconnectBackoff;
use futures::stream::Stream;
use serde::Serialize;
use tokio_stream::StreamExt;

#[derive(Debug, Serialize)]
struct WireEvent<'a, T> {
    kind: &'static str,
    key: &'a str,
    value: &'a Option<T>,
}

fn kind_name(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Added => "ADDED",
        EventKind::Modified => "MODIFIED",
        EventKind::Deleted => "DELETED",
    }
}

fn to_sse<T: Serialize>(ev: &EntityEvent<T>) -> Event {
    let wire = WireEvent {
        kind: kind_name(ev.kind),
        key: &ev.key,
        value: &ev.value,
    };
    Event::default()
        .event(wire.kind)
        .data(serde_json::to_string(&wire).unwrap_or_else(|_| "{}".to_string()))
}

/// Re-lists and re-subscribes after an exponential backoff (§4.A) rather
/// than closing the SSE connection the first time the underlying watch
/// stream ends.
pub fn node_event_stream(registry: Registry) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let mut backoff = ReconnectBackoff::new();
        loop {
            match registry.watch_nodes().await {
                Ok(mut stream) => {
                    backoff.reset();
                    while let Some(ev) = stream.next().await {
                        yield Ok(to_sse(&ev));
                    }
                    tracing::warn!("node watch stream ended, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "watch_nodes failed to start, retrying");
                }
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }
}

pub fn instance_event_stream(registry: Registry) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let mut backoff = ReconnectBackoff::new();
        loop {
            match registry.watch_instances().await {
                Ok(mut stream) => {
                    backoff.reset();
                    while let Some(ev) = stream.next().await {
                        yield Ok(to_sse(&ev));
                    }
                    tracing::warn!("instance watch stream ended, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "watch_instances failed to start, retrying");
                }
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }
}

/// Filters an instance watch stream down to a single instance id, for the
/// per-instance `WatchInstance` endpoint.
pub fn single_instance_event_stream(
    registry: Registry,
    id: InstanceId,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let target_key = keys::instance_key(&id);
    async_stream::stream! {
        let mut backoff = ReconnectBackoff::new();
        loop {
            match registry.watch_instances().await {
                Ok(mut stream) => {
                    backoff.reset();
                    while let Some(ev) = stream.next().await {
                        if ev.key == target_key {
                            yield Ok(to_sse(&ev));
                        }
                    }
                    tracing::warn!("instance watch stream ended, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "watch_instances failed to start, retrying");
                }
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }
}
