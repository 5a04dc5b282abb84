//! Process-wide table of open stream sessions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::session::StreamSession;
use crate::types::{SessionId, TenantId};

/// Registry of active stream sessions keyed by session id.
///
/// Every mutation and every snapshot takes the same lock, so registration,
/// removal and the sweep's snapshot are mutually exclusive. The lock is never
/// held across an `.await`, detector I/O or encoding.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<StreamSession>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. A duplicate id is a programming error and is
    /// rejected without touching the existing entry.
    pub fn register(&self, session: Arc<StreamSession>) -> Result<()> {
        self.register_bounded(session, usize::MAX)
    }

    /// Register a session unless its tenant already holds `limit` sessions.
    pub fn register_bounded(&self, session: Arc<StreamSession>, limit: usize) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let id = session.id();

        if sessions.contains_key(&id) {
            error!(session_id = %id, "Duplicate stream session registration");
            return Err(Error::DuplicateSession(id));
        }

        let tenant = session.tenant_id();
        let open = sessions
            .values()
            .filter(|s| s.tenant_id() == tenant)
            .count();
        if open >= limit {
            return Err(Error::TenantLimit {
                tenant: tenant.clone(),
                limit,
            });
        }

        sessions.insert(id, session);
        debug!(session_id = %id, active = sessions.len(), "Stream session registered");
        Ok(())
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<StreamSession>> {
        let removed = self.sessions.lock().remove(id);
        if removed.is_some() {
            debug!(session_id = %id, "Stream session removed");
        }
        removed
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<StreamSession>> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains_key(id)
    }

    /// All registered sessions, for iteration without holding the lock.
    pub fn snapshot(&self) -> Vec<Arc<StreamSession>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Number of sessions open for a tenant.
    pub fn count_for_tenant(&self, tenant: &TenantId) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|s| s.tenant_id() == tenant)
            .count()
    }
}
