//! QR session state machine
//!
//! ```text
//! PENDING ──confirm──▶ CONFIRMED
//!    │ ├───deadline──▶ EXPIRED
//!    │ └────cancel───▶ CANCELLED
//! ```
//!
//! Every transition is a conditional write on `status == PENDING`, so
//! concurrent confirm, cancel and lazy expiry resolve to exactly one winner.
//! Expiry is only enforced when a session is read.

use crate::account::User;
use crate::clock::Clock;
use crate::credential::{Credential, CredentialError, CredentialIssuer};
use crate::notifier::ConfirmationNotifier;
use crate::session::{QrSession, SessionId};
use crate::storage::StorageError;
use crate::store::SessionStore;
use chrono::Duration;
use std::sync::Arc;
use sudosos_core::QrStatus;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Outcomes of a QR operation that are not a success
#[derive(Debug, Error)]
pub enum QrError {
    #[error("QR session not found")]
    NotFound,
    #[error("QR session has expired")]
    Expired,
    #[error("QR session is {0}, not pending")]
    InvalidState(QrStatus),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),
}

pub type QrResult<T> = Result<T, QrError>;

/// A successful confirmation
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub session: QrSession,
    pub credential: Credential,
}

/// Drives QR sessions through their lifecycle
pub struct QrAuthService {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    issuer: Arc<dyn CredentialIssuer>,
    notifier: Arc<dyn ConfirmationNotifier>,
}

impl QrAuthService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        issuer: Arc<dyn CredentialIssuer>,
        notifier: Arc<dyn ConfirmationNotifier>,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            issuer,
            notifier,
        }
    }

    /// Session lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Start a new pending session
    pub async fn generate(&self) -> QrResult<QrSession> {
        let session = self.store.create(self.clock.now(), self.ttl).await?;
        info!("Generated QR session {}", session.session_id);
        Ok(session)
    }

    /// Load a session, expiring it first if its deadline has passed.
    ///
    /// Never returns a pending session whose deadline is behind `now`.
    pub async fn fetch(&self, id: &SessionId) -> QrResult<Option<QrSession>> {
        let Some(session) = self.store.get(id).await? else {
            return Ok(None);
        };

        let now = self.clock.now();
        if !session.is_pending() || !session.is_past_deadline(now) {
            return Ok(Some(session));
        }

        let expired = session.expired(now);
        if self.store.save_if(&expired, QrStatus::Pending).await? {
            info!("QR session {} expired", id);
            return Ok(Some(expired));
        }

        debug!("QR session {} left pending concurrently, re-reading", id);
        Ok(self.store.get(id).await?)
    }

    /// Bind a pending session to `user` and issue a credential.
    ///
    /// Exactly one of any number of concurrent confirmations succeeds.
    pub async fn confirm(&self, id: &SessionId, user: &User) -> QrResult<Confirmation> {
        let session = self.fetch(id).await?.ok_or(QrError::NotFound)?;
        guard_pending(&session)?;

        let confirmed = session.confirmed(user.clone(), self.clock.now());
        if !self.store.save_if(&confirmed, QrStatus::Pending).await? {
            debug!("Lost confirm race on QR session {}", id);
            let current = self.store.get(id).await?.ok_or(QrError::NotFound)?;
            guard_pending(&current)?;
            return Err(QrError::InvalidState(current.status));
        }
        info!("QR session {} confirmed by user {}", id, user.id);

        let credential = self.issuer.issue(user).await?;

        if let Err(e) = self.notifier.notify_confirmed(&confirmed, &credential) {
            warn!("Failed to notify QR session {}: {}", id, e);
        }

        Ok(Confirmation {
            session: confirmed,
            credential,
        })
    }

    /// Cancel a pending session.
    ///
    /// Terminal sessions are returned unchanged; unknown IDs give `None`.
    pub async fn cancel(&self, id: &SessionId) -> QrResult<Option<QrSession>> {
        let Some(session) = self.fetch(id).await? else {
            return Ok(None);
        };
        if !session.is_pending() {
            debug!("Ignoring cancel of {} QR session {}", session.status, id);
            return Ok(Some(session));
        }

        let cancelled = session.cancelled(self.clock.now());
        if self.store.save_if(&cancelled, QrStatus::Pending).await? {
            info!("QR session {} cancelled", id);
            return Ok(Some(cancelled));
        }

        Ok(self.store.get(id).await?)
    }
}

fn guard_pending(session: &QrSession) -> QrResult<()> {
    match session.status {
        QrStatus::Pending => Ok(()),
        QrStatus::Expired => Err(QrError::Expired),
        status => Err(QrError::InvalidState(status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::UserId;
    use crate::clock::ManualClock;
    use crate::credential::TokenRegistry;
    use crate::notifier::{NoopNotifier, NotifyError};
    use crate::storage::StorageResult;
    use crate::store::MemorySessionStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Counts writes that actually land
    #[derive(Default)]
    struct CountingStore {
        inner: MemorySessionStore,
        writes: AtomicUsize,
    }

    impl CountingStore {
        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionStore for CountingStore {
        async fn create(&self, now: DateTime<Utc>, ttl: Duration) -> StorageResult<QrSession> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.create(now, ttl).await
        }

        async fn get(&self, id: &SessionId) -> StorageResult<Option<QrSession>> {
            self.inner.get(id).await
        }

        async fn save(&self, session: &QrSession) -> StorageResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.save(session).await
        }

        async fn save_if(&self, session: &QrSession, expected: QrStatus) -> StorageResult<bool> {
            let landed = self.inner.save_if(session, expected).await?;
            if landed {
                self.writes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(landed)
        }
    }

    /// Records every notification
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(SessionId, String)>>,
    }

    impl ConfirmationNotifier for RecordingNotifier {
        fn notify_confirmed(
            &self,
            session: &QrSession,
            credential: &Credential,
        ) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((session.session_id.clone(), credential.token.clone()));
            Ok(())
        }
    }

    struct FailingNotifier;

    impl ConfirmationNotifier for FailingNotifier {
        fn notify_confirmed(&self, s: &QrSession, _: &Credential) -> Result<(), NotifyError> {
            Err(NotifyError::NoListeners(s.session_id.to_string()))
        }
    }

    struct FailingIssuer;

    #[async_trait]
    impl CredentialIssuer for FailingIssuer {
        async fn issue(&self, _: &User) -> Result<Credential, CredentialError> {
            Err(CredentialError::Issuance("signing key unavailable".to_string()))
        }
    }

    struct Harness {
        service: Arc<QrAuthService>,
        store: Arc<CountingStore>,
        clock: Arc<ManualClock>,
        tokens: Arc<TokenRegistry>,
    }

    fn harness_with(notifier: Arc<dyn ConfirmationNotifier>) -> Harness {
        let store = Arc::new(CountingStore::default());
        let clock = Arc::new(ManualClock::default());
        let tokens = Arc::new(TokenRegistry::new(Duration::hours(1), clock.clone()).unwrap());
        let service = Arc::new(QrAuthService::new(
            store.clone(),
            clock.clone(),
            Duration::seconds(300),
            tokens.clone(),
            notifier,
        ));
        Harness {
            service,
            store,
            clock,
            tokens,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(NoopNotifier))
    }

    fn user(name: &str) -> User {
        User {
            id: UserId::new(),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_generate_is_pending() {
        let h = harness();
        let session = h.service.generate().await.unwrap();

        assert_eq!(session.status, QrStatus::Pending);
        assert!(session.expires_at > session.created_at);
        assert_eq!(session.expires_at - session.created_at, Duration::seconds(300));
        assert!(session.confirmed_at.is_none());
    }

    #[tokio::test]
    async fn test_fetch_unknown_is_none() {
        let h = harness();
        assert!(h.service.fetch(&SessionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lazy_expiry_writes_once() {
        let h = harness();
        let session = h.service.generate().await.unwrap();
        let id = session.session_id.clone();

        let fetched = h.service.fetch(&id).await.unwrap().unwrap();
        assert_eq!(fetched.status, QrStatus::Pending);

        h.clock.advance(Duration::seconds(301));
        let writes_before = h.store.writes();

        let first = h.service.fetch(&id).await.unwrap().unwrap();
        assert_eq!(first.status, QrStatus::Expired);
        assert_eq!(h.store.writes(), writes_before + 1);

        let second = h.service.fetch(&id).await.unwrap().unwrap();
        assert_eq!(second.status, QrStatus::Expired);
        assert_eq!(second.updated_at, first.updated_at);
        assert_eq!(h.store.writes(), writes_before + 1);
    }

    #[tokio::test]
    async fn test_expiry_scenario() {
        let h = harness();
        let id = h.service.generate().await.unwrap().session_id;

        h.clock.advance(Duration::seconds(300));
        assert_eq!(
            h.service.fetch(&id).await.unwrap().unwrap().status,
            QrStatus::Expired
        );

        let result = h.service.confirm(&id, &user("Alice")).await;
        assert!(matches!(result, Err(QrError::Expired)));

        let after_cancel = h.service.cancel(&id).await.unwrap().unwrap();
        assert_eq!(after_cancel.status, QrStatus::Expired);
    }

    #[tokio::test]
    async fn test_confirm_expired_without_prior_read() {
        let h = harness();
        let id = h.service.generate().await.unwrap().session_id;

        h.clock.advance(Duration::minutes(10));
        let result = h.service.confirm(&id, &user("Alice")).await;
        assert!(matches!(result, Err(QrError::Expired)));
    }

    #[tokio::test]
    async fn test_confirm_unknown_is_not_found() {
        let h = harness();
        let result = h.service.confirm(&SessionId::new(), &user("Alice")).await;
        assert!(matches!(result, Err(QrError::NotFound)));
    }

    #[tokio::test]
    async fn test_confirm_then_second_confirm() {
        let h = harness();
        let id = h.service.generate().await.unwrap().session_id;
        let alice = user("Alice");

        let confirmation = h.service.confirm(&id, &alice).await.unwrap();
        assert_eq!(confirmation.session.status, QrStatus::Confirmed);
        assert_eq!(confirmation.credential.user, alice);
        assert_eq!(
            h.tokens.validate(&confirmation.credential.token).await,
            Some(alice.clone())
        );

        let second = h.service.confirm(&id, &user("Bob")).await;
        assert!(matches!(
            second,
            Err(QrError::InvalidState(QrStatus::Confirmed))
        ));

        let stored = h.service.fetch(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, QrStatus::Confirmed);
        assert_eq!(stored.user, Some(alice));
        assert!(stored.confirmed_at.unwrap() >= stored.created_at);
    }

    #[tokio::test]
    async fn test_confirmed_session_survives_deadline() {
        let h = harness();
        let id = h.service.generate().await.unwrap().session_id;
        h.service.confirm(&id, &user("Alice")).await.unwrap();

        h.clock.advance(Duration::hours(1));
        let stored = h.service.fetch(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, QrStatus::Confirmed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirm_has_one_winner() {
        let h = harness();
        let id = h.service.generate().await.unwrap().session_id;

        let mut handles = Vec::new();
        for i in 0..16 {
            let service = h.service.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                service.confirm(&id, &user(&format!("user-{i}"))).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(QrError::InvalidState(QrStatus::Confirmed)) => {}
                Err(e) => panic!("unexpected outcome: {e}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let h = harness();
        let id = h.service.generate().await.unwrap().session_id;

        let cancelled = h.service.cancel(&id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, QrStatus::Cancelled);

        let result = h.service.confirm(&id, &user("Alice")).await;
        assert!(matches!(
            result,
            Err(QrError::InvalidState(QrStatus::Cancelled))
        ));
    }

    #[tokio::test]
    async fn test_cancel_does_not_overwrite_confirmed() {
        let h = harness();
        let id = h.service.generate().await.unwrap().session_id;
        h.service.confirm(&id, &user("Alice")).await.unwrap();
        let writes = h.store.writes();

        let after = h.service.cancel(&id).await.unwrap().unwrap();
        assert_eq!(after.status, QrStatus::Confirmed);
        assert_eq!(h.store.writes(), writes);
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_none() {
        let h = harness();
        assert!(h.service.cancel(&SessionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_notifier_receives_credential() {
        let notifier = Arc::new(RecordingNotifier::default());
        let h = harness_with(notifier.clone());
        let id = h.service.generate().await.unwrap().session_id;

        let confirmation = h.service.confirm(&id, &user("Alice")).await.unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (id, confirmation.credential.token));
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_fail_confirm() {
        let h = harness_with(Arc::new(FailingNotifier));
        let id = h.service.generate().await.unwrap().session_id;

        assert!(h.service.confirm(&id, &user("Alice")).await.is_ok());
        assert_eq!(
            h.service.fetch(&id).await.unwrap().unwrap().status,
            QrStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_issuer_failure_keeps_confirmation() {
        let store = Arc::new(MemorySessionStore::new());
        let clock = Arc::new(ManualClock::default());
        let service = QrAuthService::new(
            store,
            clock,
            Duration::seconds(300),
            Arc::new(FailingIssuer),
            Arc::new(NoopNotifier),
        );
        let id = service.generate().await.unwrap().session_id;

        let result = service.confirm(&id, &user("Alice")).await;
        assert!(matches!(result, Err(QrError::Credential(_))));
        assert_eq!(
            service.fetch(&id).await.unwrap().unwrap().status,
            QrStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_confirm_retry_after_failed_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            crate::file_store::FileSessionStore::open(Some(dir.path()))
                .await
                .unwrap(),
        );
        let clock = Arc::new(ManualClock::default());
        let tokens = Arc::new(TokenRegistry::new(Duration::hours(1), clock.clone()).unwrap());
        let service = QrAuthService::new(
            store.clone(),
            clock,
            Duration::seconds(300),
            tokens,
            Arc::new(NoopNotifier),
        );
        let id = service.generate().await.unwrap().session_id;

        let blocker = store.path().with_extension("json.tmp");
        std::fs::create_dir(&blocker).unwrap();
        let result = service.confirm(&id, &user("Alice")).await;
        assert!(matches!(result, Err(QrError::Storage(_))));
        let stored = service.fetch(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, QrStatus::Pending);

        std::fs::remove_dir(&blocker).unwrap();
        let confirmation = service.confirm(&id, &user("Alice")).await.unwrap();
        assert_eq!(confirmation.session.status, QrStatus::Confirmed);

        let reopened = crate::file_store::FileSessionStore::open(Some(dir.path()))
            .await
            .unwrap();
        let on_disk = reopened.get(&id).await.unwrap().unwrap();
        assert_eq!(on_disk.status, QrStatus::Confirmed);
    }
}
