//! Session store persisted to a JSON file
//!
//! Uses `~/.config/sudosos/qr_sessions.json` by default. Every change is
//! applied to a copy of the table and flushed to disk while the lock is
//! held. The in-memory table only moves once the file write succeeded.

use crate::session::{QrSession, SessionId};
use crate::storage::{self, StorageResult};
use crate::store::{SessionStore, SessionTable};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use sudosos_core::QrStatus;
use tokio::sync::RwLock;
use tracing::info;

/// File name of the session table inside the data directory
pub const SESSIONS_FILE: &str = "qr_sessions.json";

/// JSON-file-backed session store
pub struct FileSessionStore {
    path: PathBuf,
    table: RwLock<SessionTable>,
}

impl FileSessionStore {
    /// Open the store in `data_dir`, or the platform config directory
    pub async fn open(data_dir: Option<&Path>) -> StorageResult<Self> {
        let path = storage::data_file(data_dir, SESSIONS_FILE)?;
        Self::with_path(path).await
    }

    /// Open the store at a specific path
    pub async fn with_path(path: PathBuf) -> StorageResult<Self> {
        let table: SessionTable = storage::load_or_default(&path)?;
        info!("Session store at {:?} holds {} sessions", path, table.len());
        Ok(Self {
            path,
            table: RwLock::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, now: DateTime<Utc>, ttl: Duration) -> StorageResult<QrSession> {
        let mut table = self.table.write().await;
        let mut next = table.clone();
        let session = next.insert_new(now, ttl);
        storage::write_atomic(&self.path, &next)?;
        *table = next;
        Ok(session)
    }

    async fn get(&self, id: &SessionId) -> StorageResult<Option<QrSession>> {
        let table = self.table.read().await;
        Ok(table.get(id).cloned())
    }

    async fn save(&self, session: &QrSession) -> StorageResult<()> {
        let mut table = self.table.write().await;
        let mut next = table.clone();
        next.replace(session)?;
        storage::write_atomic(&self.path, &next)?;
        *table = next;
        Ok(())
    }

    async fn save_if(&self, session: &QrSession, expected: QrStatus) -> StorageResult<bool> {
        let mut table = self.table.write().await;
        let mut next = table.clone();
        if !next.replace_if(session, expected) {
            return Ok(false);
        }
        storage::write_atomic(&self.path, &next)?;
        *table = next;
        Ok(true)
    }
}
