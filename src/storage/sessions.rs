use async_trait::async_trait;
use redis::{Client, aio::MultiplexedConnection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::cli::config::SessionCacheSettings;
use crate::job::types::SessionState;
use crate::storage::StorageError;

/// Session state keyed by session id or cache key
///
/// Writes are last-writer-wins; no locking is assumed across job runs.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<SessionState>, StorageError>;

    async fn save(&self, key: &str, state: &SessionState) -> Result<(), StorageError>;
}

/// Factory for creating a SessionCache implementation
pub struct SessionCacheFactory;

impl SessionCacheFactory {
    /// Create a session cache based on the settings
    pub async fn create(settings: &SessionCacheSettings) -> Result<Arc<dyn SessionCache>, StorageError> {
        match settings.backend.as_str() {
            "memory" => Ok(Arc::new(MemorySessionCache::new())),
            "redis" => {
                let cache = RedisSessionCache::new(&settings.redis_url, settings.ttl_secs).await?;
                Ok(Arc::new(cache))
            },
            other => Err(StorageError::UnsupportedBackend {
                kind: "session cache",
                backend: other.to_string(),
            }),
        }
    }
}

/// Process-local session cache
#[derive(Default)]
pub struct MemorySessionCache {
    states: RwLock<HashMap<String, SessionState>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn load(&self, key: &str) -> Result<Option<SessionState>, StorageError> {
        Ok(self.states.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, state: &SessionState) -> Result<(), StorageError> {
        self.states.write().await.insert(key.to_string(), state.clone());
        Ok(())
    }
}

/// Redis-backed session cache; entries expire after the configured TTL
pub struct RedisSessionCache {
    /// Entry TTL in seconds
    ttl_secs: u64,

    /// Shared connection
    conn_pool: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisSessionCache {
    pub async fn new(redis_url: &str, ttl_secs: u64) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        debug!("Connected session cache to Redis at {}", redis_url);

        Ok(Self {
            ttl_secs,
            conn_pool: Arc::new(Mutex::new(conn)),
        })
    }

    fn state_key(key: &str) -> String {
        format!("extractor:session:{}", key)
    }
}

impl RedisSessionCache {
    /// SET with an expiry, or without one when `ttl_secs` is 0
    fn set_command(key: &str, raw: &str, ttl_secs: u64) -> redis::Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(Self::state_key(key)).arg(raw);
        if ttl_secs > 0 {
            cmd.arg("EX").arg(ttl_secs);
        }
        cmd
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn load(&self, key: &str) -> Result<Option<SessionState>, StorageError> {
        let mut conn = self.conn_pool.lock().await;

        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::state_key(key))
            .query_async(&mut *conn)
            .await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, state: &SessionState) -> Result<(), StorageError> {
        let raw = serde_json::to_string(state)?;

        let mut conn = self.conn_pool.lock().await;

        Self::set_command(key, &raw, self.ttl_secs)
            .query_async::<_, ()>(&mut *conn)
            .await?;

        debug!("Saved {} session state under {}", state.kind(), key);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_cache_last_writer_wins() {
        let cache = MemorySessionCache::new();
        assert!(cache.load("s1").await.unwrap().is_none());

        cache.save("s1", &SessionState::Workflow(json!({"kind": "step", "n": 1}))).await.unwrap();
        cache.save("s1", &SessionState::Workflow(json!({"kind": "step", "n": 2}))).await.unwrap();

        assert_eq!(cache.len().await, 1);
        assert_eq!(
            cache.load("s1").await.unwrap(),
            Some(SessionState::Workflow(json!({"kind": "step", "n": 2})))
        );
    }

    #[test]
    fn test_zero_ttl_stores_without_expiry() {
        let packed = |ttl| String::from_utf8_lossy(&RedisSessionCache::set_command("s1", "{}", ttl).get_packed_command()).into_owned();

        assert!(packed(600).contains("EX"));
        assert!(packed(600).contains("600"));
        assert!(!packed(0).contains("EX"));
        assert!(packed(0).contains("extractor:session:s1"));
    }

    #[tokio::test]
    async fn test_factory_rejects_unknown_backend() {
        let settings = SessionCacheSettings {
            backend: "memcached".to_string(),
            redis_url: String::new(),
            ttl_secs: 60,
        };

        match SessionCacheFactory::create(&settings).await {
            Err(StorageError::UnsupportedBackend { backend, .. }) => assert_eq!(backend, "memcached"),
            _ => panic!("expected unsupported backend error"),
        }
    }
}
