//! Accounts allowed to confirm QR sessions
//!
//! Each account holds a hashed API key. The key is shown once at creation
//! and authenticates the confirming device.

use crate::credential::{generate_token, hash_token};
use crate::storage::{self, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// File name of the account list inside the data directory
pub const ACCOUNTS_FILE: &str = "accounts.json";

/// Unique identifier for a user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a user, as held by sessions and credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Display name at the time of reference
    pub name: String,
}

/// A stored account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub user: User,
    /// SHA-256 of the API key
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredAccounts {
    accounts: HashMap<String, Account>,
}

/// Account list with file persistence
pub struct AccountStore {
    path: PathBuf,
    data: RwLock<StoredAccounts>,
}

impl AccountStore {
    /// Open the account list in `data_dir`, or the platform config directory
    pub async fn open(data_dir: Option<&Path>) -> StorageResult<Self> {
        let path = storage::data_file(data_dir, ACCOUNTS_FILE)?;
        Self::with_path(path).await
    }

    pub async fn with_path(path: PathBuf) -> StorageResult<Self> {
        let data = storage::load_or_default(&path)?;
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Create an account and return it with its plaintext API key
    pub async fn create_account(&self, name: &str) -> StorageResult<(Account, String)> {
        let key = generate_token();
        let account = Account {
            user: User {
                id: UserId::new(),
                name: name.to_string(),
            },
            key_hash: hash_token(&key),
            created_at: Utc::now(),
            last_seen: None,
        };

        let mut data = self.data.write().await;
        data.accounts
            .insert(account.user.id.to_string(), account.clone());
        storage::write_atomic(&self.path, &*data)?;
        info!("Created account {} ({})", account.user.name, account.user.id);

        Ok((account, key))
    }

    /// Resolve an API key to its user, recording the visit
    pub async fn authenticate(&self, api_key: &str) -> Option<User> {
        let key_hash = hash_token(api_key);
        let mut data = self.data.write().await;
        let account = data
            .accounts
            .values_mut()
            .find(|a| a.key_hash == key_hash)?;
        account.last_seen = Some(Utc::now());
        let user = account.user.clone();

        if let Err(e) = storage::write_atomic(&self.path, &*data) {
            warn!("Failed to record last seen for {}: {}", user.id, e);
        }
        Some(user)
    }

    /// List all accounts
    pub async fn list(&self) -> Vec<Account> {
        let data = self.data.read().await;
        data.accounts.values().cloned().collect()
    }

    /// Remove an account by ID
    pub async fn remove(&self, id: &UserId) -> StorageResult<()> {
        let mut data = self.data.write().await;
        if data.accounts.remove(&id.to_string()).is_none() {
            return Err(StorageError::NotFound(id.to_string()));
        }
        storage::write_atomic(&self.path, &*data)?;
        info!("Removed account {}", id);
        Ok(())
    }
}
