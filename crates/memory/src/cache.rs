//! In-process ephemeral cache with per-key expiry.
//!
//! Expired entries are invisible to every read and are purged lazily on
//! writes and listings. Time comes from `tokio::time::Instant`, so tests can
//! pause and advance the clock.

use async_trait::async_trait;
use recallkit_core::cache::EphemeralCache;
use recallkit_core::error::MemoryError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// A process-local [`EphemeralCache`].
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }
}

#[async_trait]
impl EphemeralCache for InMemoryCache {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), MemoryError> {
        if ttl.is_zero() {
            return Err(MemoryError::Validation(format!(
                "TTL for cache key '{key}' must be greater than zero"
            )));
        }

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, MemoryError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .map(|k| {
                entries
                    .get(k)
                    .filter(|e| e.is_live(now))
                    .map(|e| e.value.clone())
            })
            .collect())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, MemoryError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| e.is_live(now) && glob_match::glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn del(&self, keys: &[String]) -> Result<usize, MemoryError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let removed = keys
            .iter()
            .filter_map(|k| entries.remove(k))
            .filter(|e| e.is_live(now))
            .count();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn set_then_get() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", HOUR).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = InMemoryCache::new();
        cache.set("short", "1", Duration::from_secs(10)).await.unwrap();
        cache.set("long", "2", HOUR).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("long").await.unwrap().as_deref(), Some("2"));
        assert_eq!(cache.keys("*").await.unwrap(), vec!["long".to_string()]);
        assert_eq!(cache.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn zero_ttl_rejected() {
        let cache = InMemoryCache::new();
        let err = cache.set("k", "v", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[tokio::test]
    async fn mget_preserves_slots() {
        let cache = InMemoryCache::new();
        cache.set("a", "1", HOUR).await.unwrap();
        cache.set("c", "3", HOUR).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values = cache.mget(&keys).await.unwrap();
        assert_eq!(values, vec![Some("1".into()), None, Some("3".into())]);
    }

    #[tokio::test]
    async fn keys_match_pattern_and_del_counts_existing() {
        let cache = InMemoryCache::new();
        cache.set("wm:a:s1:x", "1", HOUR).await.unwrap();
        cache.set("wm:a:s1:y", "2", HOUR).await.unwrap();
        cache.set("wm:a:s2:x", "3", HOUR).await.unwrap();

        let keys = cache.keys("wm:a:s1:*").await.unwrap();
        assert_eq!(keys, vec!["wm:a:s1:x".to_string(), "wm:a:s1:y".to_string()]);

        let mut doomed = keys.clone();
        doomed.push("wm:a:s1:never".into());
        assert_eq!(cache.del(&doomed).await.unwrap(), 2);
        assert_eq!(cache.keys("wm:*").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn keys_pattern_supports_single_char_and_classes() {
        let cache = InMemoryCache::new();
        cache.set("wm:a:s1:x", "1", HOUR).await.unwrap();
        cache.set("wm:a:s2:x", "2", HOUR).await.unwrap();
        cache.set("wm:a:s10:x", "3", HOUR).await.unwrap();

        assert_eq!(cache.keys("wm:a:s?:x").await.unwrap().len(), 2);
        assert_eq!(
            cache.keys("wm:a:s[1]:*").await.unwrap(),
            vec!["wm:a:s1:x".to_string()]
        );
        assert_eq!(cache.keys("wm:a:s1:x").await.unwrap().len(), 1);
    }
}
