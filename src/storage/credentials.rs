use async_trait::async_trait;
use chrono::Utc;
use redis::{Client, aio::MultiplexedConnection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::cli::config::CredentialSettings;
use crate::job::types::CookieInfo;
use crate::storage::StorageError;

const COOKIE_PREFIX: &str = "cookie_";

/// Per-service cookies with an absolute expiry
///
/// Shared by every job for a service. The expiry check and the refresh write
/// are not atomic, so concurrent jobs may refresh the same cookie twice.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stored cookie info, expired or not
    async fn get_cookie_info(&self, service_id: &str) -> Result<Option<CookieInfo>, StorageError>;

    async fn set_cookie_info(&self, service_id: &str, info: &CookieInfo) -> Result<(), StorageError>;

    async fn remove_cookie(&self, service_id: &str) -> Result<(), StorageError>;

    /// Every service id with a stored cookie
    async fn service_ids(&self) -> Result<Vec<String>, StorageError>;

    /// Cookie value, or None when absent or expired
    async fn get_cookie(&self, service_id: &str) -> Result<Option<String>, StorageError> {
        match self.get_cookie_info(service_id).await? {
            Some(info) if !info.is_expired_at(Utc::now().timestamp()) => Ok(info.cookie),
            _ => Ok(None),
        }
    }

    /// A missing cookie counts as expired
    async fn is_expired(&self, service_id: &str) -> Result<bool, StorageError> {
        match self.get_cookie_info(service_id).await? {
            Some(info) => Ok(info.is_expired_at(Utc::now().timestamp())),
            None => Ok(true),
        }
    }

    /// Remove expired cookies, returning how many were dropped
    async fn clean_expired(&self) -> Result<usize, StorageError> {
        let mut cleaned = 0;
        for service_id in self.service_ids().await? {
            if self.is_expired(&service_id).await? {
                self.remove_cookie(&service_id).await?;
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    /// Service ids whose cookie is still valid
    async fn valid_ids(&self) -> Result<Vec<String>, StorageError> {
        let mut valid = Vec::new();
        for service_id in self.service_ids().await? {
            if !self.is_expired(&service_id).await? {
                valid.push(service_id);
            }
        }
        Ok(valid)
    }
}

/// Factory for creating a CredentialStore implementation
pub struct CredentialStoreFactory;

impl CredentialStoreFactory {
    /// Create a credential store based on the settings
    pub async fn create(settings: &CredentialSettings) -> Result<Arc<dyn CredentialStore>, StorageError> {
        match settings.backend.as_str() {
            "memory" => Ok(Arc::new(MemoryCredentialStore::new())),
            "redis" => {
                let store = RedisCredentialStore::new(&settings.redis_url).await?;
                Ok(Arc::new(store))
            },
            other => Err(StorageError::UnsupportedBackend {
                kind: "credential store",
                backend: other.to_string(),
            }),
        }
    }
}

/// Process-local credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    cookies: RwLock<HashMap<String, CookieInfo>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_cookie_info(&self, service_id: &str) -> Result<Option<CookieInfo>, StorageError> {
        Ok(self.cookies.read().await.get(service_id).cloned())
    }

    async fn set_cookie_info(&self, service_id: &str, info: &CookieInfo) -> Result<(), StorageError> {
        self.cookies.write().await.insert(service_id.to_string(), info.clone());
        Ok(())
    }

    async fn remove_cookie(&self, service_id: &str) -> Result<(), StorageError> {
        self.cookies.write().await.remove(service_id);
        Ok(())
    }

    async fn service_ids(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.cookies.read().await.keys().cloned().collect())
    }
}

/// Redis-backed credential store, one JSON value per `cookie_<service>` key
pub struct RedisCredentialStore {
    /// Shared connection
    conn_pool: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisCredentialStore {
    pub async fn new(redis_url: &str) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        debug!("Connected credential store to Redis at {}", redis_url);

        Ok(Self {
            conn_pool: Arc::new(Mutex::new(conn)),
        })
    }

    fn cookie_key(service_id: &str) -> String {
        format!("{}{}", COOKIE_PREFIX, service_id)
    }
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn get_cookie_info(&self, service_id: &str) -> Result<Option<CookieInfo>, StorageError> {
        let raw: Option<String> = {
            let mut conn = self.conn_pool.lock().await;
            redis::cmd("GET")
                .arg(Self::cookie_key(service_id))
                .query_async(&mut *conn)
                .await?
        };

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                // Corrupt entries are dropped and treated as absent
                warn!("Discarding unreadable cookie for {}: {}", service_id, e);
                self.remove_cookie(service_id).await?;
                Ok(None)
            }
        }
    }

    async fn set_cookie_info(&self, service_id: &str, info: &CookieInfo) -> Result<(), StorageError> {
        let raw = serde_json::to_string(info)?;

        let mut conn = self.conn_pool.lock().await;

        redis::cmd("SET")
            .arg(Self::cookie_key(service_id))
            .arg(raw)
            .query_async::<_, ()>(&mut *conn)
            .await?;

        debug!("Stored cookie for service: {}", service_id);

        Ok(())
    }

    async fn remove_cookie(&self, service_id: &str) -> Result<(), StorageError> {
        let mut conn = self.conn_pool.lock().await;

        redis::cmd("DEL")
            .arg(Self::cookie_key(service_id))
            .query_async::<_, ()>(&mut *conn)
            .await?;

        Ok(())
    }

    async fn service_ids(&self) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn_pool.lock().await;

        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}*", COOKIE_PREFIX))
            .query_async(&mut *conn)
            .await?;

        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(COOKIE_PREFIX).map(str::to_string))
            .collect())
    }
}
