//! The coordination store client abstraction (§4.A): a linearizable KV/lease
//! service with prefix watch, consumed by every component above it.
//!
//! Expressed as a trait object (`Arc<dyn CoordinationStore>`) rather than a
//! concrete backend, following §9's dependency-injection discipline — no
//! subsystem above this crate ever names a concrete store type.

mod backoff;
mod local;

pub use backoff::ReconnectBackoff;
pub use local::LocalStore;

use async_trait::async_trait;
use fleetd_core::ClusterResult;
use std::pin::Pin;
use tokio_stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Put,
    Delete,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub key: String,
    pub value: Option<Vec<u8>>,
}

pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// The capability set of §4.A, verbatim: `get`, `put`, `put_with_ttl`,
/// `create_if_absent`, `delete`, `list_prefix`, `watch_prefix`.
///
/// Implementations MUST provide linearizable reads on point operations and
/// monotonic at-least-once delivery of watch events, converging after a
/// reconnect. `watch_prefix` replays the current contents of `prefix` as
/// `Put` events before switching to live delivery, so that callers never
/// need a separate initial list — the "`ADDED` then live" behavior required
/// by §4.C and §4.I's `WatchNodes`/`WatchInstance` falls directly out of
/// this contract instead of being reimplemented by every watcher.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> ClusterResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> ClusterResult<()>;

    /// Refreshable TTL write; a fresh `put_with_ttl` on the same key resets
    /// the deadline (this is how lease refresh in §4.C is implemented).
    async fn put_with_ttl(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> ClusterResult<()>;

    /// Atomic compare-and-create: succeeds only if `key` did not already
    /// exist. The sole mutual-exclusion primitive IPAM and the scheduler's
    /// optimistic node.allocated increment rely on (§9).
    async fn create_if_absent(&self, key: &str, value: Vec<u8>) -> ClusterResult<bool>;

    async fn delete(&self, key: &str) -> ClusterResult<()>;

    async fn list_prefix(&self, prefix: &str) -> ClusterResult<Vec<(String, Vec<u8>)>>;

    async fn watch_prefix(&self, prefix: &str) -> ClusterResult<WatchStream>;

    /// Atomic compare-and-swap: succeeds and installs `new_value` only if
    /// the current value under `key` equals `expected_value` byte-for-byte
    /// (`None` meaning "key absent"). This is the serializing authority §9
    /// requires for the scheduler's optimistic `node.allocated` increment —
    /// a local mutex cannot substitute for it once the store has more than
    /// one writer.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_value: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> ClusterResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_stream::StreamExt;

    fn store() -> Arc<LocalStore> {
        LocalStore::new()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let s = store();
        s.put("/nodes/a", b"hello".to_vec()).await.unwrap();
        let v = s.get("/nodes/a").await.unwrap();
        assert_eq!(v, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let s = store();
        assert_eq!(s.get("/nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_if_absent_only_succeeds_once() {
        let s = store();
        assert!(s.create_if_absent("/k", b"1".to_vec()).await.unwrap());
        assert!(!s.create_if_absent("/k", b"2".to_vec()).await.unwrap());
        assert_eq!(s.get("/k").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn list_prefix_only_returns_matching_keys() {
        let s = store();
        s.put("/nodes/a", b"1".to_vec()).await.unwrap();
        s.put("/nodes/b", b"2".to_vec()).await.unwrap();
        s.put("/instances/c", b"3".to_vec()).await.unwrap();
        let mut items = s.list_prefix("/nodes/").await.unwrap();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, "/nodes/a");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let s = store();
        s.put("/k", b"1".to_vec()).await.unwrap();
        s.delete("/k").await.unwrap();
        s.delete("/k").await.unwrap();
        assert_eq!(s.get("/k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn watch_prefix_replays_then_goes_live() {
        let s = store();
        s.put("/nodes/a", b"1".to_vec()).await.unwrap();
        let mut stream = s.watch_prefix("/nodes/").await.unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.event_type, WatchEventType::Put);
        assert_eq!(first.key, "/nodes/a");

        s.put("/nodes/b", b"2".to_vec()).await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(second.key, "/nodes/b");
    }

    #[tokio::test]
    async fn ttl_expiry_emits_delete_event() {
        let s = LocalStore::with_sweep_interval(std::time::Duration::from_millis(20));
        s.put_with_ttl("/nodes/a", b"1".to_vec(), 0).await.unwrap();
        let mut stream = s.watch_prefix("/nodes/").await.unwrap();
        // replay of the (not-yet-expired-at-subscribe-time) put
        let _ = stream.next().await;

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let ev = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.event_type, WatchEventType::Delete);
        assert_eq!(s.get("/nodes/a").await.unwrap(), None);
    }
}
