//! Working memory: per-session scratch key/value state.
//!
//! Entries are scoped to `(agent, session)` through composite cache keys
//! (`{prefix}:{agent}:{session}:{key}`). Each component is percent-encoded,
//! so an ID can never contain the `:` separator or a glob metacharacter and
//! sessions never collide. Every entry carries its own expiry. Cache
//! failures propagate to the caller untouched; this store does not retry.

use recallkit_config::WorkingMemoryConfig;
use recallkit_core::cache::EphemeralCache;
use recallkit_core::error::MemoryError;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default entry lifetime: two hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7200);

/// Session-scoped key/value store backed by an [`EphemeralCache`].
#[derive(Clone)]
pub struct WorkingMemoryStore {
    cache: Arc<dyn EphemeralCache>,
    prefix: String,
    default_ttl: Duration,
}

impl WorkingMemoryStore {
    pub fn new(cache: Arc<dyn EphemeralCache>) -> Self {
        Self {
            cache,
            prefix: "wm".into(),
            default_ttl: DEFAULT_TTL,
        }
    }

    pub fn from_config(cache: Arc<dyn EphemeralCache>, config: &WorkingMemoryConfig) -> Self {
        Self {
            cache,
            prefix: config.key_prefix.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
        }
    }

    fn session_prefix(&self, agent_id: &str, session_id: &str) -> String {
        format!(
            "{}:{}:{}:",
            encode(&self.prefix),
            encode(agent_id),
            encode(session_id)
        )
    }

    fn cache_key(&self, agent_id: &str, session_id: &str, key: &str) -> String {
        format!("{}{}", self.session_prefix(agent_id, session_id), encode(key))
    }

    /// Cache keys for every live entry of a session.
    async fn session_keys(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<Vec<String>, MemoryError> {
        let pattern = format!("{}*", self.session_prefix(agent_id, session_id));
        self.cache.keys(&pattern).await
    }

    /// Create or overwrite an entry. `ttl = None` uses the configured default.
    pub async fn set(
        &self,
        agent_id: &str,
        session_id: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), MemoryError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let cache_key = self.cache_key(agent_id, session_id, key);
        self.cache.set(&cache_key, value, ttl).await?;
        debug!(
            agent_id = %agent_id,
            session_id = %session_id,
            key = %key,
            ttl_secs = ttl.as_secs(),
            "Working memory set"
        );
        Ok(())
    }

    pub async fn get(
        &self,
        agent_id: &str,
        session_id: &str,
        key: &str,
    ) -> Result<Option<String>, MemoryError> {
        self.cache
            .get(&self.cache_key(agent_id, session_id, key))
            .await
    }

    /// Remove one entry. Returns `true` if it existed.
    pub async fn delete(
        &self,
        agent_id: &str,
        session_id: &str,
        key: &str,
    ) -> Result<bool, MemoryError> {
        let removed = self
            .cache
            .del(&[self.cache_key(agent_id, session_id, key)])
            .await?;
        Ok(removed > 0)
    }

    /// Keys (without namespace) of every live entry in the session, sorted.
    pub async fn list_keys(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<Vec<String>, MemoryError> {
        let prefix = self.session_prefix(agent_id, session_id);
        let mut keys: Vec<String> = self
            .session_keys(agent_id, session_id)
            .await?
            .iter()
            .filter_map(|k| decode(k.strip_prefix(&prefix)?))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Every live entry in the session, fetched with a single bulk read.
    pub async fn get_all(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<BTreeMap<String, String>, MemoryError> {
        let keys = self.session_keys(agent_id, session_id).await?;
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }

        let values = self.cache.mget(&keys).await?;
        let prefix = self.session_prefix(agent_id, session_id);

        // An entry can expire between the listing and the bulk read; its slot is then empty.
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(k, v)| Some((decode(k.strip_prefix(&prefix)?)?, v?)))
            .collect())
    }

    /// Remove every entry in the session. Returns how many were removed.
    pub async fn clear(&self, agent_id: &str, session_id: &str) -> Result<usize, MemoryError> {
        let keys = self.session_keys(agent_id, session_id).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.cache.del(&keys).await
    }

    /// Session-end hook: proactively clears the session instead of waiting for expiry.
    pub async fn end_session(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<usize, MemoryError> {
        let cleared = self.clear(agent_id, session_id).await?;
        info!(
            agent_id = %agent_id,
            session_id = %session_id,
            cleared,
            "Working memory cleared at session end"
        );
        Ok(cleared)
    }
}

/// Percent-encode a key component. Only `A-Z a-z 0-9 - _ . ~` pass through.
fn encode(component: &str) -> Cow<'_, str> {
    urlencoding::encode(component)
}

/// Reverse of [`encode`]; `None` for cache keys this store did not write.
fn decode(component: &str) -> Option<String> {
    urlencoding::decode(component).ok().map(Cow::into_owned)
}
