//! Push channel to whoever waits on a confirmed session

use crate::credential::Credential;
use crate::session::QrSession;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("No listeners for session {0}")]
    NoListeners(String),
}

/// Delivers a one-shot confirmation to the waiting party.
///
/// Must not block; delivery is best effort.
pub trait ConfirmationNotifier: Send + Sync {
    fn notify_confirmed(
        &self,
        session: &QrSession,
        credential: &Credential,
    ) -> Result<(), NotifyError>;
}

/// Notifier for deployments without a push channel
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ConfirmationNotifier for NoopNotifier {
    fn notify_confirmed(&self, _: &QrSession, _: &Credential) -> Result<(), NotifyError> {
        Ok(())
    }
}
