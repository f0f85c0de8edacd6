//! Session Registry - the sole source of truth for active sessions.
//!
//! A plain keyed store: it never starts or stops billing timers. Every
//! operation takes the lock once, so concurrent callers (the controller and
//! read-only status queries) never observe a partially-updated entry. Readers
//! get cloned snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::Instant;

/// An active, billed session between a reader (provider) and a client.
#[derive(Debug, Clone)]
pub struct Session {
    /// Caller-supplied session id, also the room id.
    pub id: String,
    /// Reader (provider) participant id.
    pub provider_id: String,
    /// Client participant id.
    pub client_id: String,
    /// Wall-clock start time, reported to observers.
    pub started_at: DateTime<Utc>,
    /// Monotonic start time, the billing basis.
    pub started: Instant,
    /// True from start until termination.
    pub active: bool,
}

impl Session {
    /// Create a session starting now.
    #[must_use]
    pub fn start(id: String, provider_id: String, client_id: String) -> Self {
        Self {
            id,
            provider_id,
            client_id,
            started_at: Utc::now(),
            started: Instant::now(),
            active: true,
        }
    }

    /// Whole seconds elapsed since start.
    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Serializable snapshot of this session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            reader_id: self.provider_id.clone(),
            client_id: self.client_id.clone(),
            started_at: self.started_at,
            elapsed_seconds: self.elapsed_seconds(),
        }
    }
}

/// Read-only view of an active session, as exposed over the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub reader_id: String,
    pub client_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
}

/// Thread-safe map from session id to [`Session`].
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `session.id`, returning the previous entry.
    pub fn put(&self, session: Session) -> Option<Session> {
        let mut sessions = self.write_sessions();
        sessions.insert(session.id.clone(), session)
    }

    /// Get a snapshot of the session with the given id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        let sessions = self.read_sessions();
        sessions.get(id).cloned()
    }

    /// Delete the entry for `id`. Returns whether an entry existed.
    pub fn remove(&self, id: &str) -> bool {
        self.take(id).is_some()
    }

    /// Delete and return the entry for `id`.
    pub fn take(&self, id: &str) -> Option<Session> {
        let mut sessions = self.write_sessions();
        sessions.remove(id)
    }

    /// Whether an entry exists for `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        let sessions = self.read_sessions();
        sessions.contains_key(id)
    }

    /// Snapshots of all sessions, ordered by start time.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let sessions = self.read_sessions();
        let mut list: Vec<_> = sessions.values().map(Session::snapshot).collect();
        list.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        list
    }

    /// Ids of all sessions.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let sessions = self.read_sessions();
        sessions.keys().cloned().collect()
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        let sessions = self.read_sessions();
        sessions.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panicked writer never leaves a half-built entry behind, so a poisoned
    // lock still holds a consistent map.
    fn read_sessions(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
