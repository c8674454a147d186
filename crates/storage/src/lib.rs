//! Storage Layer
//!
//! Persists proctoring sessions (warning state) and their violations.
//! Provides an in-memory store and a SQLite store behind one trait.

mod memory;
mod records;
mod sqlite;

pub use memory::MemoryStore;
pub use records::{format_duration, summarize, NewViolation, SessionRecord, SessionReport, ViolationRecord};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Record not found")]
    NotFound,
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            other => StorageError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

/// Session and violation persistence.
///
/// Warning updates are upserts keyed by client id, so retries are safe.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session; `false` if one already exists
    async fn create_session(&self, client_id: &str, start_time: DateTime<Utc>) -> Result<bool, StorageError>;

    /// Set the session end time; `false` if there is no such session
    async fn end_session(&self, client_id: &str, end_time: DateTime<Utc>) -> Result<bool, StorageError>;

    async fn get_session(&self, client_id: &str) -> Result<Option<SessionRecord>, StorageError>;

    /// Record the warning count, creating the session if needed
    async fn update_warning_count(
        &self,
        client_id: &str,
        warning_count: u32,
        last_warning_time: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;

    /// Append a violation and return its id
    async fn store_violation(
        &self,
        client_id: &str,
        violation: NewViolation,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, StorageError>;

    /// All violations for a client, newest first
    async fn get_violations(&self, client_id: &str) -> Result<Vec<ViolationRecord>, StorageError>;

    /// Delete a session and its violations; `false` if nothing existed
    async fn delete_session(&self, client_id: &str) -> Result<bool, StorageError>;

    /// All sessions, most recently started first
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StorageError>;
}
