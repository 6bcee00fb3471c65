//! QR session status and WebSocket protocol message types

use serde::{Deserialize, Serialize};

/// Lifecycle state of a QR login session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QrStatus {
    /// Waiting for a device to confirm
    Pending,
    /// Confirmed by an authenticated user
    Confirmed,
    /// Deadline passed while pending
    Expired,
    /// Cancelled by the generating party
    Cancelled,
}

impl QrStatus {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QrStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QrStatus::Pending => "PENDING",
            QrStatus::Confirmed => "CONFIRMED",
            QrStatus::Expired => "EXPIRED",
            QrStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for QrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-to-client messages on the QR wait socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Session is pending; the client should keep waiting
    Waiting {
        session_id: String,
        /// Seconds until the session expires
        expires_in: i64,
    },
    /// Session was confirmed; carries the issued token
    Confirmed {
        session_id: String,
        token: String,
        /// Display name of the confirming user
        user: String,
    },
    /// Session reached a terminal state without a token for this client
    Status { session_id: String, status: QrStatus },
    /// Error message
    Error { message: String },
    /// Ping for connection keepalive
    Ping { timestamp: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&QrStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        let parsed: QrStatus = serde_json::from_str("\"EXPIRED\"").unwrap();
        assert_eq!(parsed, QrStatus::Expired);
        assert!(serde_json::from_str::<QrStatus>("\"GONE\"").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!QrStatus::Pending.is_terminal());
        assert!(QrStatus::Confirmed.is_terminal());
        assert!(QrStatus::Expired.is_terminal());
        assert!(QrStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_server_message_tagging() {
        let msg = ServerMessage::Status {
            session_id: "abc".to_string(),
            status: QrStatus::Expired,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "Status");
        assert_eq!(json["status"], "EXPIRED");
    }
}
