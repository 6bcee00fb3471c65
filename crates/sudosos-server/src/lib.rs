//! SudoSOS Server - Axum-based HTTP and WebSocket API
//!
//! Exposes the QR login state machine over REST and pushes confirmations to
//! waiting kiosks over WebSocket.

pub mod broadcast;
pub mod error;
pub mod http;
pub mod tls;
pub mod websocket;

pub use broadcast::{AppState, BroadcastNotifier, QrEvent, EVENT_CAPACITY};
pub use error::ApiError;
pub use http::create_router;
pub use tls::{calculate_cert_fingerprint, load_tls, TlsError, TlsSetup};
pub use websocket::handle_qr_socket;
