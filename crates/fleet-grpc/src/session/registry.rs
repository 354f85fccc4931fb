use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::debug;

use super::Session;

/// Directory of live sessions keyed by agent id.
///
/// Entries are weak: the per-connection worker owns its session, and a lookup
/// never keeps a closed session alive. At most one entry exists per agent id;
/// registering an id that is already present replaces the old entry.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Weak<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for the session's agent id. Returns the
    /// displaced session if it was still alive.
    pub async fn register(&self, session: &Arc<Session>) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let previous = sessions.insert(session.agent_id().to_string(), Arc::downgrade(session));
        debug!(agent_id = session.agent_id(), "Registered session");
        previous.and_then(|weak| weak.upgrade())
    }

    pub async fn lookup(&self, agent_id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.get(agent_id).and_then(Weak::upgrade)
    }

    /// Remove the entry for `agent_id`. Absent ids are not an error.
    pub async fn unregister(&self, agent_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(agent_id).is_some()
    }

    /// Remove the entry for `agent_id` only if it still points at `session`.
    pub async fn unregister_session(&self, agent_id: &str, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(agent_id) {
            Some(current) if std::ptr::eq(current.as_ptr(), Arc::as_ptr(session)) => {
                sessions.remove(agent_id);
                true
            }
            Some(_) => {
                debug!(agent_id, "Session was replaced; leaving newer entry in place");
                false
            }
            None => false,
        }
    }

    /// Number of entries whose session is still alive.
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.values().filter(|s| s.strong_count() > 0).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
