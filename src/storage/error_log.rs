use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::cli::config::ErrorLogSettings;
use crate::storage::StorageError;

/// A failure about to be recorded
#[derive(Debug, Clone, PartialEq)]
pub struct NewErrorLog {
    pub stack_trace: String,

    /// Label of the task that failed (the job type name for jobs)
    pub task: String,

    pub error_code: String,

    /// URL of the originating request, if any
    pub request: Option<String>,
}

/// A recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ErrorLogEntry {
    pub id: i64,
    pub logged_at: DateTime<Utc>,
    pub stack_trace: String,
    pub task: String,
    pub error_code: String,
    pub request: Option<String>,
}

/// Durable record of job failures
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ErrorLog: Send + Sync {
    /// Record a failure and return its id
    async fn insert(&self, entry: NewErrorLog) -> Result<i64, StorageError>;

    async fn get(&self, id: i64) -> Result<Option<ErrorLogEntry>, StorageError>;

    /// All entries, newest first
    async fn list(&self) -> Result<Vec<ErrorLogEntry>, StorageError>;

    /// Returns whether an entry was removed
    async fn delete(&self, id: i64) -> Result<bool, StorageError>;
}

/// Factory for creating an ErrorLog implementation
pub struct ErrorLogFactory;

impl ErrorLogFactory {
    /// Create an error log based on the settings
    pub async fn create(settings: &ErrorLogSettings) -> Result<Arc<dyn ErrorLog>, StorageError> {
        match settings.backend.as_str() {
            "memory" => Ok(Arc::new(MemoryErrorLog::new())),
            "postgresql" => {
                let log = PostgresErrorLog::new(settings).await?;
                Ok(Arc::new(log))
            },
            other => Err(StorageError::UnsupportedBackend {
                kind: "error log",
                backend: other.to_string(),
            }),
        }
    }
}

/// Process-local error log with sequential ids starting at 1
#[derive(Default)]
pub struct MemoryErrorLog {
    entries: Mutex<Vec<ErrorLogEntry>>,
    last_id: AtomicI64,
}

impl MemoryErrorLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ErrorLog for MemoryErrorLog {
    async fn insert(&self, entry: NewErrorLog) -> Result<i64, StorageError> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;

        self.entries.lock().await.push(ErrorLogEntry {
            id,
            logged_at: Utc::now(),
            stack_trace: entry.stack_trace,
            task: entry.task,
            error_code: entry.error_code,
            request: entry.request,
        });

        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<ErrorLogEntry>, StorageError> {
        Ok(self.entries.lock().await.iter().find(|e| e.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<ErrorLogEntry>, StorageError> {
        Ok(self.entries.lock().await.iter().rev().cloned().collect())
    }

    async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() != before)
    }
}

/// PostgreSQL implementation of ErrorLog
pub struct PostgresErrorLog {
    /// PostgreSQL connection pool
    pool: Pool<Postgres>,

    /// Schema name
    schema: String,

    /// Table prefix
    table_prefix: String,
}

impl PostgresErrorLog {
    /// Connect and make sure the error log table exists
    pub async fn new(settings: &ErrorLogSettings) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&settings.connection_string)
            .await?;

        let log = Self {
            pool,
            schema: settings.schema_name.clone(),
            table_prefix: settings.table_prefix.clone(),
        };

        log.ensure_table().await?;

        debug!("Connected error log to PostgreSQL");

        Ok(log)
    }

    fn table_name(&self) -> String {
        format!("{}.{}_error_log", self.schema, self.table_prefix)
    }

    async fn ensure_table(&self) -> Result<(), StorageError> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&self.pool)
            .await?;

        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                logged_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                stack_trace TEXT NOT NULL,
                task TEXT NOT NULL,
                error_code TEXT NOT NULL,
                request TEXT
            )",
            self.table_name()
        );

        sqlx::query(&query)
            .execute(&self.pool)
            .await?;

        debug!("Ensured error log table exists: {}", self.table_name());

        Ok(())
    }
}

#[async_trait]
impl ErrorLog for PostgresErrorLog {
    async fn insert(&self, entry: NewErrorLog) -> Result<i64, StorageError> {
        let query = format!(
            "INSERT INTO {} (logged_at, stack_trace, task, error_code, request)
             VALUES (NOW(), $1, $2, $3, $4)
             RETURNING id",
            self.table_name()
        );

        let id: i64 = sqlx::query_scalar(&query)
            .bind(&entry.stack_trace)
            .bind(&entry.task)
            .bind(&entry.error_code)
            .bind(&entry.request)
            .fetch_one(&self.pool)
            .await?;

        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<ErrorLogEntry>, StorageError> {
        let query = format!(
            "SELECT id, logged_at, stack_trace, task, error_code, request FROM {} WHERE id = $1",
            self.table_name()
        );

        let entry = sqlx::query_as::<_, ErrorLogEntry>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry)
    }

    async fn list(&self) -> Result<Vec<ErrorLogEntry>, StorageError> {
        let query = format!(
            "SELECT id, logged_at, stack_trace, task, error_code, request FROM {} ORDER BY id DESC",
            self.table_name()
        );

        let entries = sqlx::query_as::<_, ErrorLogEntry>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let query = format!("DELETE FROM {} WHERE id = $1", self.table_name());

        let result = sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: &str) -> NewErrorLog {
        NewErrorLog {
            stack_trace: format!("trace for {}", code),
            task: "FETCH_INFO".to_string(),
            error_code: code.to_string(),
            request: Some("https://example.com/watch?v=1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_memory_log_assigns_ids() {
        let log = MemoryErrorLog::new();

        let first = log.insert(failure("A001")).await.unwrap();
        let second = log.insert(failure("B002")).await.unwrap();
        assert_eq!((first, second), (1, 2));

        let entry = log.get(second).await.unwrap().unwrap();
        assert_eq!(entry.error_code, "B002");
        assert_eq!(entry.task, "FETCH_INFO");

        let listed: Vec<i64> = log.list().await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(listed, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_memory_log_delete() {
        let log = MemoryErrorLog::new();
        let id = log.insert(failure("A001")).await.unwrap();

        assert!(log.delete(id).await.unwrap());
        assert!(!log.delete(id).await.unwrap());
        assert!(log.get(id).await.unwrap().is_none());
    }
}
