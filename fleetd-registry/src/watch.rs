//! Translates raw `WatchEvent`s into typed `Added`/`Modified`/`Deleted` deltas
//! (§4.B's `watch_instances`/`watch_nodes` helper; §4.C's node-index
//! maintenance; §4.I's `WatchNodes`/`WatchInstance` replay-then-live shape).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleetd_store::{WatchEvent, WatchEventType, WatchStream};
use serde::de::DeserializeOwned;
use std::pin::Pin;
use tokio_stream::{Stream, StreamExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct EntityEvent<T> {
    pub kind: EventKind,
    pub key: String,
    /// The new value; `None` only for `Deleted`.
    pub value: Option<T>,
    /// The previous value, present on `Modified`.
    pub previous: Option<T>,
    pub ts: DateTime<Utc>,
}

pub type EntityStream<T> = Pin<Box<dyn Stream<Item = EntityEvent<T>> + Send>>;

/// Wraps a raw prefix watch (which already replays existing keys as `Put`
/// events before going live, per `CoordinationStore::watch_prefix`) with a
/// local seen-set so that the first observation of any key is `Added` and
/// subsequent puts for the same key are `Modified` carrying both values.
/// `Delete` is only emitted if the key was actually known, so a subscriber
/// never double-fires a deletion it never saw as added (dedup across the
/// replay/live boundary).
pub fn translate<T>(raw: WatchStream) -> EntityStream<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    let seen: DashMap<String, T> = DashMap::new();
    let stream = raw.filter_map(move |ev: WatchEvent| {
        let ts = Utc::now();
        match ev.event_type {
            WatchEventType::Put => {
                let value: T = match ev.value.as_deref().map(serde_json::from_slice) {
                    Some(Ok(v)) => v,
                    _ => {
                        tracing::warn!(key = %ev.key, "dropping watch event with undecodable value");
                        return None;
                    }
                };
                let previous = seen.get(&ev.key).map(|v| v.clone());
                seen.insert(ev.key.clone(), value.clone());
                let kind = if previous.is_some() {
                    EventKind::Modified
                } else {
                    EventKind::Added
                };
                Some(EntityEvent {
                    kind,
                    key: ev.key,
                    value: Some(value),
                    previous,
                    ts,
                })
            }
            WatchEventType::Delete => {
                let (_, previous) = seen.remove(&ev.key)?;
                Some(EntityEvent {
                    kind: EventKind::Deleted,
                    key: ev.key,
                    value: None,
                    previous: Some(previous),
                    ts,
                })
            }
        }
    });
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetd_store::{CoordinationStore, LocalStore};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Doc {
        v: u32,
    }

    #[tokio::test]
    async fn first_put_is_added_second_is_modified() {
        let store = LocalStore::new();
        store
            .put("/x/a", serde_json::to_vec(&Doc { v: 1 }).unwrap())
            .await
            .unwrap();

        let raw = store.watch_prefix("/x/").await.unwrap();
        let mut stream = translate::<Doc>(raw);

        let first = stream.next().await.unwrap();
        assert_eq!(first.kind, EventKind::Added);
        assert_eq!(first.value, Some(Doc { v: 1 }));

        store
            .put("/x/a", serde_json::to_vec(&Doc { v: 2 }).unwrap())
            .await
            .unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(second.kind, EventKind::Modified);
        assert_eq!(second.previous, Some(Doc { v: 1 }));
        assert_eq!(second.value, Some(Doc { v: 2 }));
    }

    #[tokio::test]
    async fn delete_after_add_emits_deleted_once() {
        let store = LocalStore::new();
        store
            .put("/x/a", serde_json::to_vec(&Doc { v: 1 }).unwrap())
            .await
            .unwrap();
        let raw = store.watch_prefix("/x/").await.unwrap();
        let mut stream = translate::<Doc>(raw);
        let _ = stream.next().await; // Added replay

        store.delete("/x/a").await.unwrap();
        let del = stream.next().await.unwrap();
        assert_eq!(del.kind, EventKind::Deleted);
    }
}
