//! Snapshot-keyed memoization for resolve/expand/bundle results.
//!
//! Keys are `sha256(op || "|" || snapshot_etag || "|" || canonical_input)`,
//! so a new snapshot etag invalidates everything passively. The snapshot
//! watcher additionally evicts proactively when it observes a change.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// TTL for resolve results.
pub const TTL_RESOLVE: Duration = Duration::from_secs(300);
/// TTL for one-hop expansions.
pub const TTL_EXPAND: Duration = Duration::from_secs(60);
/// TTL for built evidence bundles.
pub const TTL_BUNDLE: Duration = Duration::from_secs(60);
/// TTL for enriched records (bounded by the snapshot anyway).
pub const TTL_ENRICH: Duration = Duration::from_secs(60);

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Process-wide cache; readers do not block readers.
#[derive(Default)]
pub struct SnapshotCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the canonical cache key for an operation.
    pub fn key(op: &str, snapshot_etag: &str, input: &Value) -> String {
        let canonical_input = bv_canon::canonical_string(input);
        let material = format!("{op}|{snapshot_etag}|{canonical_input}");
        bv_canon::fingerprint_bytes(material.as_bytes())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        serde_json::from_value(entry.value.clone()).ok()
    }

    pub async fn put<T: Serialize>(&self, key: String, value: &T, ttl: Duration) {
        let Ok(value) = serde_json::to_value(value) else {
            return;
        };
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop everything. Called by the snapshot watcher on etag change.
    pub async fn evict_all(&self) {
        let mut entries = self.entries.write().await;
        let dropped = entries.len();
        entries.clear();
        debug!(dropped, "cache evicted");
    }

    /// Drop expired entries; the watcher calls this on its poll ticks.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip() {
        let cache = SnapshotCache::new();
        let key = SnapshotCache::key("resolve", "E1", &json!({"q": "why"}));
        cache.put(key.clone(), &vec!["a", "b"], TTL_RESOLVE).await;
        let got: Option<Vec<String>> = cache.get(&key).await;
        assert_eq!(got, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn test_key_changes_with_snapshot() {
        let input = json!({"q": "why"});
        let k1 = SnapshotCache::key("resolve", "E1", &input);
        let k2 = SnapshotCache::key("resolve", "E2", &input);
        assert_ne!(k1, k2);
    }

    #[tokio::test]
    async fn test_key_is_canonical_over_input_order() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        assert_eq!(
            SnapshotCache::key("expand", "E1", &a),
            SnapshotCache::key("expand", "E1", &b)
        );
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let cache = SnapshotCache::new();
        let key = "k".to_string();
        cache.put(key.clone(), &1u32, Duration::from_millis(0)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let got: Option<u32> = cache.get(&key).await;
        assert!(got.is_none());
        cache.purge_expired().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_evict_all() {
        let cache = SnapshotCache::new();
        cache.put("a".to_string(), &1u32, TTL_EXPAND).await;
        cache.put("b".to_string(), &2u32, TTL_EXPAND).await;
        cache.evict_all().await;
        assert_eq!(cache.len().await, 0);
    }
}
