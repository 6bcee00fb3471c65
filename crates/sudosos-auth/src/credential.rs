//! Tokens issued when a QR session is confirmed
//!
//! Tokens are random 32-byte values. Only their SHA-256 hash is kept.

use crate::account::User;
use crate::clock::Clock;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Credential errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Token lifetime must be positive")]
    InvalidLifetime,
    #[error("Credential issuance failed: {0}")]
    Issuance(String),
}

/// A token handed to both devices after confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

/// Produces credentials for confirmed users
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, user: &User) -> Result<Credential, CredentialError>;
}

#[derive(Debug, Clone)]
struct IssuedToken {
    user: User,
    expires_at: DateTime<Utc>,
}

/// In-memory registry of issued bearer tokens
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, IssuedToken>>,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenRegistry {
    pub fn new(lifetime: Duration, clock: Arc<dyn Clock>) -> Result<Self, CredentialError> {
        if lifetime <= Duration::zero() {
            return Err(CredentialError::InvalidLifetime);
        }
        Ok(Self {
            tokens: RwLock::new(HashMap::new()),
            lifetime,
            clock,
        })
    }

    /// Resolve a token to its user if it is known and unexpired
    pub async fn validate(&self, token: &str) -> Option<User> {
        let tokens = self.tokens.read().await;
        let issued = tokens.get(&hash_token(token))?;
        if self.clock.now() >= issued.expires_at {
            debug!("Rejected expired token for {}", issued.user.id);
            return None;
        }
        Some(issued.user.clone())
    }

    /// Drop expired tokens, returning how many were removed
    pub async fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| now < t.expires_at);
        before - tokens.len()
    }
}

#[async_trait]
impl CredentialIssuer for TokenRegistry {
    async fn issue(&self, user: &User) -> Result<Credential, CredentialError> {
        let token = generate_token();
        let now = self.clock.now();
        let expires_at = now + self.lifetime;

        let mut tokens = self.tokens.write().await;
        tokens.retain(|_, t| now < t.expires_at);
        tokens.insert(
            hash_token(&token),
            IssuedToken {
                user: user.clone(),
                expires_at,
            },
        );
        info!("Issued token for user {}", user.id);

        Ok(Credential {
            token,
            user: user.clone(),
            expires_at,
        })
    }
}

/// Generate a secure random token
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    BASE64.encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    BASE64.encode(hasher.finalize())
}
