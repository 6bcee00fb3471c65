//! QR login session records
//!
//! A session is created pending, and moves exactly once into one of the
//! terminal states. Transitions return the successor record and leave the
//! original untouched; stores decide whether the write lands.

use crate::account::User;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sudosos_core::QrStatus;
use uuid::Uuid;

/// Opaque identifier of a QR session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a session ID from its string form
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A QR login session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrSession {
    pub session_id: SessionId,
    pub status: QrStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Account that confirmed the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Time of the last stored write
    pub updated_at: DateTime<Utc>,
}

impl QrSession {
    /// Create a pending session expiring `ttl` after `now`
    pub fn new(session_id: SessionId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            session_id,
            status: QrStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            confirmed_at: None,
            user: None,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == QrStatus::Pending
    }

    /// Whether the deadline has been reached at `now`
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Seconds left until the deadline, never negative
    pub fn remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// The URL encoded in the QR code for this session
    pub fn confirm_url(&self, public_url: &str) -> String {
        format!(
            "{}/auth/qr/confirm?sessionId={}",
            public_url.trim_end_matches('/'),
            self.session_id
        )
    }

    /// Successor record in the expired state
    pub fn expired(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: QrStatus::Expired,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Successor record confirmed by `user`
    pub fn confirmed(&self, user: User, now: DateTime<Utc>) -> Self {
        Self {
            status: QrStatus::Confirmed,
            confirmed_at: Some(now.max(self.created_at)),
            user: Some(user),
            updated_at: now,
            ..self.clone()
        }
    }

    /// Successor record in the cancelled state
    pub fn cancelled(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: QrStatus::Cancelled,
            updated_at: now,
            ..self.clone()
        }
    }
}
