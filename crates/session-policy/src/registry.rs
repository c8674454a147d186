//! Registry of live client sessions
//!
//! One policy per client identifier. The map lock is held only to look up,
//! insert, move or remove entries; frame processing locks the per-session
//! mutex, so frames of one session are serialized while different sessions
//! run in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::engine::SessionPolicy;

/// Shared handle to one session's policy
pub type SharedPolicy = Arc<Mutex<SessionPolicy>>;

/// Result of a rebind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebind {
    /// State moved from the old identifier
    Moved,
    /// Old identifier had no state
    Missing,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SharedPolicy>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, client_id: &str) -> Option<SharedPolicy> {
        self.sessions.read().await.get(client_id).cloned()
    }

    /// Return the session for `client_id`, creating it with `init` if absent.
    /// The flag is true when a new session was created.
    pub async fn get_or_create<F>(&self, client_id: &str, init: F) -> (SharedPolicy, bool)
    where
        F: FnOnce() -> SessionPolicy,
    {
        if let Some(existing) = self.get(client_id).await {
            return (existing, false);
        }

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(client_id) {
            return (existing.clone(), false);
        }
        let policy = Arc::new(Mutex::new(init()));
        sessions.insert(client_id.to_string(), policy.clone());
        info!(client_id = %client_id, "Session registered ({} active)", sessions.len());
        (policy, true)
    }

    /// Insert or replace the session for `client_id`
    pub async fn insert(&self, client_id: &str, policy: SessionPolicy) -> SharedPolicy {
        let shared = Arc::new(Mutex::new(policy));
        self.sessions
            .write()
            .await
            .insert(client_id.to_string(), shared.clone());
        shared
    }

    /// Move the session under `old_id` to `new_id` in one step. An existing
    /// entry under `new_id` is replaced.
    pub async fn rebind(&self, old_id: &str, new_id: &str) -> Rebind {
        if old_id == new_id {
            return if self.get(old_id).await.is_some() {
                Rebind::Moved
            } else {
                Rebind::Missing
            };
        }

        let (policy, renamed) = {
            let mut sessions = self.sessions.write().await;
            let Some(policy) = sessions.remove(old_id) else {
                return Rebind::Missing;
            };
            // rename before the new key becomes visible
            let renamed = match policy.try_lock() {
                Ok(mut guard) => {
                    guard.rename(new_id);
                    true
                }
                Err(_) => false,
            };
            sessions.insert(new_id.to_string(), policy.clone());
            (policy, renamed)
        };

        if !renamed {
            // the holder locked it under the old id; rename once it is done
            policy.lock().await.rename(new_id);
        }
        info!("Rebound session {} -> {}", old_id, new_id);
        Rebind::Moved
    }

    pub async fn remove(&self, client_id: &str) -> Option<SharedPolicy> {
        let removed = self.sessions.write().await.remove(client_id);
        if removed.is_some() {
            info!(client_id = %client_id, "Session removed");
        }
        removed
    }

    /// Remove `client_id` when nothing outside the registry holds it and
    /// `idle` accepts its policy. Callers must drop their own handle first.
    pub async fn remove_idle<F>(&self, client_id: &str, idle: F) -> bool
    where
        F: FnOnce(&SessionPolicy) -> bool,
    {
        let mut sessions = self.sessions.write().await;
        let removable = match sessions.get(client_id) {
            Some(policy) if Arc::strong_count(policy) == 1 => {
                policy.try_lock().map_or(false, |guard| idle(&*guard))
            }
            _ => false,
        };
        if removable {
            sessions.remove(client_id);
        }
        removable
    }

    /// Active client identifiers, sorted
    pub async fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
