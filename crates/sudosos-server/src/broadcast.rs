//! Shared state and the confirmation broadcast channel

use std::sync::Arc;
use sudosos_auth::{
    AccountStore, ConfirmationNotifier, Credential, NotifyError, QrAuthService, QrSession,
    SessionId, TokenRegistry, User,
};
use sudosos_core::Config;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the confirmation channel
pub const EVENT_CAPACITY: usize = 64;

/// A confirmation pushed to sockets waiting on a session
#[derive(Debug, Clone)]
pub struct QrEvent {
    pub session_id: SessionId,
    pub token: String,
    pub user: User,
}

/// Publishes confirmations on a broadcast channel
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<QrEvent>,
}

impl BroadcastNotifier {
    pub fn new(tx: broadcast::Sender<QrEvent>) -> Self {
        Self { tx }
    }
}

impl ConfirmationNotifier for BroadcastNotifier {
    fn notify_confirmed(
        &self,
        session: &QrSession,
        credential: &Credential,
    ) -> Result<(), NotifyError> {
        let event = QrEvent {
            session_id: session.session_id.clone(),
            token: credential.token.clone(),
            user: credential.user.clone(),
        };
        let receivers = self
            .tx
            .send(event)
            .map_err(|_| NotifyError::NoListeners(session.session_id.to_string()))?;
        debug!(
            "Published confirmation of {} to {} sockets",
            session.session_id, receivers
        );
        Ok(())
    }
}

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// QR session state machine
    pub qr: Arc<QrAuthService>,
    /// Accounts whose API keys may confirm sessions
    pub accounts: Arc<AccountStore>,
    /// Tokens issued by confirmations
    pub tokens: Arc<TokenRegistry>,
    /// Confirmation events for waiting sockets
    pub events: broadcast::Sender<QrEvent>,
    /// Certificate fingerprint when serving TLS
    pub cert_fingerprint: Option<String>,
}

impl AppState {
    pub fn new(
        config: Config,
        qr: Arc<QrAuthService>,
        accounts: Arc<AccountStore>,
        tokens: Arc<TokenRegistry>,
        events: broadcast::Sender<QrEvent>,
        cert_fingerprint: Option<String>,
    ) -> Self {
        Self {
            config,
            qr,
            accounts,
            tokens,
            events,
            cert_fingerprint,
        }
    }

    /// Resolve a bearer token to a user.
    ///
    /// Accepts tokens issued by a confirmation as well as account API keys.
    pub async fn authenticate(&self, token: &str) -> Option<User> {
        if let Some(user) = self.tokens.validate(token).await {
            return Some(user);
        }
        self.accounts.authenticate(token).await
    }
}
