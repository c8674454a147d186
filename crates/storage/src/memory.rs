//! In-memory session store

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::records::{NewViolation, SessionRecord, ViolationRecord};
use crate::{SessionStore, StorageError};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    violations: HashMap<String, VecDeque<ViolationRecord>>,
    next_violation_id: i64,
}

/// Store backed by process memory; contents are lost on restart
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Max violations kept per client (oldest dropped first)
    max_violations_per_client: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_retention(10_000)
    }

    pub fn with_retention(max_violations_per_client: usize) -> Self {
        info!("Creating in-memory session store");
        Self {
            inner: Mutex::new(Inner {
                next_violation_id: 1,
                ..Default::default()
            }),
            max_violations_per_client: max_violations_per_client.max(1),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, client_id: &str, start_time: DateTime<Utc>) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;
        if inner.sessions.contains_key(client_id) {
            debug!(client_id = %client_id, "Session already exists");
            return Ok(false);
        }
        inner
            .sessions
            .insert(client_id.to_string(), SessionRecord::new(client_id, start_time));
        Ok(true)
    }

    async fn end_session(&self, client_id: &str, end_time: DateTime<Utc>) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;
        match inner.sessions.get_mut(client_id) {
            Some(session) => {
                session.end_time = Some(end_time);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_session(&self, client_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        Ok(self.lock()?.sessions.get(client_id).cloned())
    }

    async fn update_warning_count(
        &self,
        client_id: &str,
        warning_count: u32,
        last_warning_time: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let session = inner
            .sessions
            .entry(client_id.to_string())
            .or_insert_with(|| SessionRecord::new(client_id, last_warning_time.unwrap_or_else(Utc::now)));
        session.warning_count = warning_count;
        session.last_warning_time = last_warning_time;
        Ok(())
    }

    async fn store_violation(
        &self,
        client_id: &str,
        violation: NewViolation,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let mut inner = self.lock()?;
        let id = inner.next_violation_id;
        inner.next_violation_id += 1;

        let max = self.max_violations_per_client;
        let log = inner.violations.entry(client_id.to_string()).or_default();
        while log.len() >= max {
            log.pop_front();
        }
        log.push_back(ViolationRecord::from_new(id, client_id, violation, timestamp));
        debug!("Inserted violation with ID {}", id);
        Ok(id)
    }

    async fn get_violations(&self, client_id: &str) -> Result<Vec<ViolationRecord>, StorageError> {
        let inner = self.lock()?;
        let mut out: Vec<ViolationRecord> = inner
            .violations
            .get(client_id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn delete_session(&self, client_id: &str) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;
        let had_violations = inner.violations.remove(client_id).is_some();
        let had_session = inner.sessions.remove(client_id).is_some();
        Ok(had_session || had_violations)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StorageError> {
        let inner = self.lock()?;
        let mut sessions: Vec<SessionRecord> = inner.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }
}
