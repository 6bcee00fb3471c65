//! SudoSOS Auth - QR code login sessions
//!
//! Lets a user who is already signed in on one device (typically a phone)
//! approve a login started on another (a kiosk or browser).
//!
//! # Flow
//!
//! 1. The kiosk calls [`QrAuthService::generate`] and renders
//!    [`QrSession::confirm_url`] as a QR code
//! 2. The kiosk polls [`QrAuthService::fetch`] or waits for a push
//! 3. The phone scans the code and calls [`QrAuthService::confirm`] for the
//!    authenticated [`User`]
//! 4. A [`Credential`] is issued, returned to the phone and handed to the
//!    [`ConfirmationNotifier`] for the kiosk
//!
//! Pending sessions expire lazily: the first read after the deadline marks
//! them expired.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::Duration;
//! use sudosos_auth::{
//!     MemorySessionStore, NoopNotifier, QrAuthService, SystemClock, TokenRegistry,
//! };
//!
//! async fn example() {
//!     let clock = Arc::new(SystemClock);
//!     let tokens = Arc::new(TokenRegistry::new(Duration::hours(1), clock.clone()).unwrap());
//!     let service = QrAuthService::new(
//!         Arc::new(MemorySessionStore::new()),
//!         clock,
//!         Duration::minutes(5),
//!         tokens,
//!         Arc::new(NoopNotifier),
//!     );
//!
//!     let session = service.generate().await.unwrap();
//!     println!("Scan: {}", session.confirm_url("https://sudosos.example"));
//! }
//! ```

pub mod account;
pub mod clock;
pub mod credential;
pub mod file_store;
pub mod notifier;
pub mod service;
pub mod session;
pub mod storage;
pub mod store;

pub use account::{Account, AccountStore, User, UserId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{
    generate_token, hash_token, Credential, CredentialError, CredentialIssuer, TokenRegistry,
};
pub use file_store::FileSessionStore;
pub use notifier::{ConfirmationNotifier, NoopNotifier, NotifyError};
pub use service::{Confirmation, QrAuthService, QrError, QrResult};
pub use session::{QrSession, SessionId};
pub use storage::{StorageError, StorageResult};
pub use store::{MemorySessionStore, SessionStore};
pub use sudosos_core::QrStatus;
