pub mod credentials;
pub mod error_log;
pub mod sessions;

use thiserror::Error;

// Re-export common types
pub use credentials::{CredentialStore, CredentialStoreFactory, MemoryCredentialStore, RedisCredentialStore};
pub use error_log::{ErrorLog, ErrorLogEntry, ErrorLogFactory, MemoryErrorLog, NewErrorLog, PostgresErrorLog};
pub use sessions::{MemorySessionCache, RedisSessionCache, SessionCache, SessionCacheFactory};

/// Errors from the storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported {kind} backend: {backend}")]
    UnsupportedBackend { kind: &'static str, backend: String },
}
