// =============================================================================
// Cache/KV contract (spec §6.4)
// =============================================================================
//
// The teacher carries no KV layer; spec §6.4 describes Redis-shaped semantics
// (TTL, pub/sub) which every consumer must treat as optional, with a
// repository fallback on miss. This implements the contract in-process as a
// `parking_lot`-guarded map plus a `tokio::sync::broadcast` channel per topic,
// so the engine has no external service dependency. This is a deliberate
// simplification over a real Redis client — noted so a production deployment
// knows to swap this module out, not the call sites that depend on the trait.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_raw(&self, key: &str) -> Option<String>;
    async fn set_raw(&self, key: &str, value: String, ttl: Duration);
    async fn mget_raw(&self, keys: &[String]) -> Vec<Option<String>>;
    async fn publish(&self, topic: &str, payload: String);
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<String>;
    async fn exists(&self, key: &str) -> bool {
        self.get_raw(key).await.is_some()
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process TTL cache with topic-keyed broadcast pub/sub.
pub struct InMemoryCache {
    store: Mutex<HashMap<String, Entry>>,
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Typed convenience wrapper over `set_raw`.
    pub async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) {
        if let Ok(json) = serde_json::to_string(value) {
            self.set_raw(key, json, ttl).await;
        }
    }

    /// Typed convenience wrapper over `get_raw`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        serde_json::from_str(&raw).ok()
    }

    fn evict_expired(store: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        store.retain(|_, e| e.expires_at > now);
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_raw(&self, key: &str) -> Option<String> {
        let mut store = self.store.lock();
        Self::evict_expired(&mut store);
        store.get(key).map(|e| e.value.clone())
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) {
        let mut store = self.store.lock();
        store.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn mget_raw(&self, keys: &[String]) -> Vec<Option<String>> {
        let mut store = self.store.lock();
        Self::evict_expired(&mut store);
        keys.iter().map(|k| store.get(k).map(|e| e.value.clone())).collect()
    }

    async fn publish(&self, topic: &str, payload: String) {
        let topics = self.topics.lock();
        if let Some(sender) = topics.get(topic) {
            let _ = sender.send(payload);
        }
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<String> {
        let mut topics = self.topics.lock();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_within_ttl() {
        let cache = InMemoryCache::new();
        cache
            .set_raw("k", "v".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get_raw("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let cache = InMemoryCache::new();
        cache
            .set_raw("k", "v".to_string(), Duration::from_millis(1))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get_raw("k").await, None);
    }

    #[tokio::test]
    async fn mget_returns_none_for_missing_keys() {
        let cache = InMemoryCache::new();
        cache
            .set_raw("a", "1".to_string(), Duration::from_secs(60))
            .await;
        let results = cache
            .mget_raw(&["a".to_string(), "b".to_string()])
            .await;
        assert_eq!(results, vec![Some("1".to_string()), None]);
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let cache = InMemoryCache::new();
        let mut rx = cache.subscribe("alert");
        cache.publish("alert", "hello".to_string()).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received, "hello");
    }
}
