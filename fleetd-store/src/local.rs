//! In-process coordination store backend.
//!
//! A `DashMap`-backed index plus a background `tokio::spawn` task on an
//! interval handles TTL-lease expiry sweeping — which is how §4.C's "N
//! missed heartbeats ⇒ key expires" behavior is actually realized without a
//! real etcd underneath.

use async_trait::async_trait;
use dashmap::DashMap;
use fleetd_core::ClusterResult;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::{CoordinationStore, WatchEvent, WatchEventType, WatchStream};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const EVENT_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

pub struct LocalStore {
    data: DashMap<String, Entry>,
    events: broadcast::Sender<WatchEvent>,
}

impl LocalStore {
    pub fn new() -> Arc<Self> {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Arc::new(Self {
            data: DashMap::new(),
            events,
        });
        store.clone().spawn_sweeper(sweep_interval);
        store
    }

    fn spawn_sweeper(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep_expired();
            }
        });
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .data
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        for key in expired {
            if self.data.remove(&key).is_some() {
                tracing::info!(key = %key, "lease expired, key removed");
                let _ = self.events.send(WatchEvent {
                    event_type: WatchEventType::Delete,
                    key,
                    value: None,
                });
            }
        }
    }

    fn put_internal(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) {
        let expires_at = ttl_seconds.map(|s| Instant::now() + Duration::from_secs(s));
        self.data.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at,
            },
        );
        let _ = self.events.send(WatchEvent {
            event_type: WatchEventType::Put,
            key: key.to_string(),
            value: Some(value),
        });
    }
}

#[async_trait]
impl CoordinationStore for LocalStore {
    async fn get(&self, key: &str) -> ClusterResult<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self.data.get(key).and_then(|e| {
            if e.is_expired(now) {
                None
            } else {
                Some(e.value.clone())
            }
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> ClusterResult<()> {
        self.put_internal(key, value, None);
        Ok(())
    }

    async fn put_with_ttl(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> ClusterResult<()> {
        self.put_internal(key, value, Some(ttl_seconds));
        Ok(())
    }

    async fn create_if_absent(&self, key: &str, value: Vec<u8>) -> ClusterResult<bool> {
        let now = Instant::now();
        // Treat an expired-but-not-yet-swept entry as absent.
        if let Some(existing) = self.data.get(key) {
            if !existing.is_expired(now) {
                return Ok(false);
            }
        }
        match self.data.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occ) if occ.get().is_expired(now) => {
                occ.insert(Entry {
                    value: value.clone(),
                    expires_at: None,
                });
            }
            dashmap::mapref::entry::Entry::Occupied(_) => return Ok(false),
            dashmap::mapref::entry::Entry::Vacant(vac) => {
                vac.insert(Entry {
                    value: value.clone(),
                    expires_at: None,
                });
            }
        }
        let _ = self.events.send(WatchEvent {
            event_type: WatchEventType::Put,
            key: key.to_string(),
            value: Some(value),
        });
        Ok(true)
    }

    async fn delete(&self, key: &str) -> ClusterResult<()> {
        if self.data.remove(key).is_some() {
            let _ = self.events.send(WatchEvent {
                event_type: WatchEventType::Delete,
                key: key.to_string(),
                value: None,
            });
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> ClusterResult<Vec<(String, Vec<u8>)>> {
        let now = Instant::now();
        Ok(self
            .data
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired(now))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_value: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> ClusterResult<bool> {
        let now = Instant::now();
        let current = self.data.get(key).and_then(|e| {
            if e.is_expired(now) {
                None
            } else {
                Some(e.value.clone())
            }
        });
        if current != expected_value {
            return Ok(false);
        }
        self.put_internal(key, new_value, None);
        Ok(true)
    }

    async fn watch_prefix(&self, prefix: &str) -> ClusterResult<WatchStream> {
        let existing = self.list_prefix(prefix).await?;
        let rx = self.events.subscribe();
        let prefix_owned = prefix.to_string();

        let replay = tokio_stream::iter(existing.into_iter().map(|(key, value)| WatchEvent {
            event_type: WatchEventType::Put,
            key,
            value: Some(value),
        }));

        let live = BroadcastStream::new(rx)
            .filter_map(|res| res.ok())
            .filter(move |ev: &WatchEvent| ev.key.starts_with(&prefix_owned));

        Ok(Box::pin(replay.chain(live)))
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("keys", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_expected_value() {
        let s = LocalStore::new();
        s.put("/k", b"1".to_vec()).await.unwrap();
        assert!(!s
            .compare_and_swap("/k", Some(b"wrong".to_vec()), b"2".to_vec())
            .await
            .unwrap());
        assert_eq!(s.get("/k").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_swap_succeeds_on_matching_expected_value() {
        let s = LocalStore::new();
        s.put("/k", b"1".to_vec()).await.unwrap();
        assert!(s
            .compare_and_swap("/k", Some(b"1".to_vec()), b"2".to_vec())
            .await
            .unwrap());
        assert_eq!(s.get("/k").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_swap_creates_when_expected_is_absent() {
        let s = LocalStore::new();
        assert!(s.compare_and_swap("/k", None, b"1".to_vec()).await.unwrap());
        assert_eq!(s.get("/k").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn create_if_absent_reclaims_expired_key() {
        // Sweep interval is long enough that the sweeper cannot have run yet;
        // create_if_absent must still treat the expired entry as absent.
        let s = LocalStore::with_sweep_interval(Duration::from_secs(3600));
        s.put_with_ttl("/k", b"1".to_vec(), 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(s.create_if_absent("/k", b"2".to_vec()).await.unwrap());
        assert_eq!(s.get("/k").await.unwrap(), Some(b"2".to_vec()));
    }
}
