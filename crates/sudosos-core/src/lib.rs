//! SudoSOS Core - Shared types and protocol definitions
//!
//! This crate provides the configuration, error type and WebSocket messages
//! shared by the auth and server crates.

pub mod config;
pub mod error;
pub mod protocol;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{QrStatus, ServerMessage};
