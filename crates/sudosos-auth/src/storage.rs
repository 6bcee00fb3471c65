//! JSON file persistence shared by the session and account stores
//!
//! Files live in `~/.config/sudosos/` unless a data directory is given.

use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Configuration directory not found")]
    NoConfigDir,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Resolve a data file, defaulting to the platform config directory
pub fn data_file(data_dir: Option<&Path>, name: &str) -> StorageResult<PathBuf> {
    match data_dir {
        Some(dir) => Ok(dir.join(name)),
        None => {
            let config_dir = dirs::config_dir().ok_or(StorageError::NoConfigDir)?;
            Ok(config_dir.join("sudosos").join(name))
        }
    }
}

/// Load a JSON document, or the default if missing or unreadable
pub(crate) fn load_or_default<T>(path: &Path) -> StorageResult<T>
where
    T: DeserializeOwned + Default,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        debug!("No existing storage at {:?}, creating new", path);
        return Ok(T::default());
    }

    let contents = std::fs::read_to_string(path)?;
    match serde_json::from_str(&contents) {
        Ok(data) => {
            info!("Loaded storage from {:?}", path);
            Ok(data)
        }
        Err(e) => {
            warn!("Failed to parse {:?}, starting fresh: {}", path, e);
            Ok(T::default())
        }
    }
}

/// Write a JSON document through a temp file and rename
pub(crate) fn write_atomic<T: Serialize>(path: &Path, data: &T) -> StorageResult<()> {
    let json = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    debug!("Saved storage to {:?}", path);
    Ok(())
}
