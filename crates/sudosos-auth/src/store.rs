//! Keyed storage of QR session records
//!
//! Stores hold no business logic. The one primitive that matters for
//! correctness is [`SessionStore::save_if`], a compare-and-set on the stored
//! status which the state machine uses for every transition.

use crate::session::{QrSession, SessionId};
use crate::storage::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use sudosos_core::QrStatus;
use tokio::sync::RwLock;
use tracing::debug;

/// Persistence of QR session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Allocate and persist a new pending session
    async fn create(&self, now: DateTime<Utc>, ttl: Duration) -> StorageResult<QrSession>;

    /// Look a session up; `None` for unknown IDs
    async fn get(&self, id: &SessionId) -> StorageResult<Option<QrSession>>;

    /// Overwrite an existing record
    async fn save(&self, session: &QrSession) -> StorageResult<()>;

    /// Overwrite an existing record only if its stored status is `expected`.
    ///
    /// Returns whether the write landed. Unknown records never match.
    async fn save_if(&self, session: &QrSession, expected: QrStatus) -> StorageResult<bool>;
}

/// Session records indexed by ID
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SessionTable {
    sessions: HashMap<SessionId, QrSession>,
}

impl SessionTable {
    /// Insert a fresh pending session under an unused ID
    pub(crate) fn insert_new(&mut self, now: DateTime<Utc>, ttl: Duration) -> QrSession {
        let mut id = SessionId::new();
        while self.sessions.contains_key(&id) {
            debug!("Session ID collision, regenerating");
            id = SessionId::new();
        }
        let session = QrSession::new(id.clone(), now, ttl);
        self.sessions.insert(id, session.clone());
        session
    }

    pub(crate) fn get(&self, id: &SessionId) -> Option<&QrSession> {
        self.sessions.get(id)
    }

    pub(crate) fn replace(&mut self, session: &QrSession) -> StorageResult<()> {
        match self.sessions.get_mut(&session.session_id) {
            Some(stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(session.session_id.to_string())),
        }
    }

    pub(crate) fn replace_if(&mut self, session: &QrSession, expected: QrStatus) -> bool {
        match self.sessions.get_mut(&session.session_id) {
            Some(stored) if stored.status == expected => {
                *stored = session.clone();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// In-memory session store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    table: RwLock<SessionTable>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, now: DateTime<Utc>, ttl: Duration) -> StorageResult<QrSession> {
        let mut table = self.table.write().await;
        Ok(table.insert_new(now, ttl))
    }

    async fn get(&self, id: &SessionId) -> StorageResult<Option<QrSession>> {
        let table = self.table.read().await;
        Ok(table.get(id).cloned())
    }

    async fn save(&self, session: &QrSession) -> StorageResult<()> {
        let mut table = self.table.write().await;
        table.replace(session)
    }

    async fn save_if(&self, session: &QrSession, expected: QrStatus) -> StorageResult<bool> {
        let mut table = self.table.write().await;
        Ok(table.replace_if(session, expected))
    }
}
