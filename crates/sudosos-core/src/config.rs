//! Configuration types for SudoSOS

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Default lifetime of a QR session (five minutes)
pub const DEFAULT_SESSION_TTL_SECS: i64 = 300;

/// Default lifetime of an issued login token
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Main configuration for the SudoSOS QR login server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind the server to
    pub bind: IpAddr,
    /// Server port
    pub port: u16,
    /// How long a QR session stays pending before it expires
    pub session_ttl_secs: i64,
    /// How long a token issued on confirmation stays valid
    pub token_ttl_secs: i64,
    /// Public base URL embedded in QR codes
    pub public_url: String,
    /// Directory for sessions and accounts (platform config dir if None)
    pub data_dir: Option<PathBuf>,
    /// Persist QR sessions to disk instead of keeping them in memory
    pub persist_sessions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            public_url: "http://localhost:3000".to_string(),
            data_dir: None,
            persist_sessions: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set bind address
    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Builder pattern: set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder pattern: set QR session lifetime
    pub fn with_session_ttl_secs(mut self, secs: i64) -> Self {
        self.session_ttl_secs = secs;
        self
    }

    /// Builder pattern: set token lifetime
    pub fn with_token_ttl_secs(mut self, secs: i64) -> Self {
        self.token_ttl_secs = secs;
        self
    }

    /// Builder pattern: set public URL
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = url.into();
        self
    }

    /// Builder pattern: set data directory
    pub fn with_data_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.data_dir = dir;
        self
    }

    /// Builder pattern: persist sessions to disk
    pub fn with_persist_sessions(mut self, persist: bool) -> Self {
        self.persist_sessions = persist;
        self
    }

    /// Public URL without a trailing slash
    pub fn public_base(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }

    /// Check the configuration for values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl_secs <= 0 {
            return Err(Error::config("session TTL must be positive"));
        }
        if self.token_ttl_secs <= 0 {
            return Err(Error::config("token TTL must be positive"));
        }
        if self.port == 0 {
            return Err(Error::config("port must not be 0"));
        }
        if self.public_base().is_empty() {
            return Err(Error::config("public URL must not be empty"));
        }
        Ok(())
    }
}
