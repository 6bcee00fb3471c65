//! TLS support for the SudoSOS server
//!
//! Loads a PEM certificate and key for `axum-server`'s rustls acceptor.

use axum_server::tls_rustls::RustlsConfig;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid certificate or key: {0}")]
    Config(std::io::Error),
}

/// A loaded rustls configuration with the certificate's fingerprint
pub struct TlsSetup {
    pub config: RustlsConfig,
    pub fingerprint: String,
}

/// Load a certificate and private key from PEM files
pub async fn load_tls(cert_path: &Path, key_path: &Path) -> Result<TlsSetup, TlsError> {
    let cert_pem = read(cert_path)?;
    let key_pem = read(key_path)?;
    let fingerprint = calculate_cert_fingerprint(&cert_pem);

    let config = RustlsConfig::from_pem(cert_pem.into_bytes(), key_pem.into_bytes())
        .await
        .map_err(TlsError::Config)?;
    info!("Loaded TLS certificate from {:?}", cert_path);

    Ok(TlsSetup {
        config,
        fingerprint,
    })
}

fn read(path: &Path) -> Result<String, TlsError> {
    std::fs::read_to_string(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Calculate SHA-256 fingerprint of a certificate in human-readable format
pub fn calculate_cert_fingerprint(cert_pem: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert_pem.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fingerprint_calculation() {
        let cert = "-----BEGIN CERTIFICATE-----\ntest\n-----END CERTIFICATE-----";
        let fp = calculate_cert_fingerprint(cert);
        assert!(fp.contains(':'));
        assert_eq!(fp.len(), 95); // 32 bytes * 2 hex + 31 colons
        assert_eq!(fp, calculate_cert_fingerprint(cert));
    }

    #[tokio::test]
    async fn test_missing_files_are_reported() {
        let dir = tempdir().unwrap();
        let cert = dir.path().join("server.crt");
        let key = dir.path().join("server.key");

        let result = load_tls(&cert, &key).await;
        assert!(matches!(result, Err(TlsError::Read { path, .. }) if path == cert));
    }

    #[tokio::test]
    async fn test_garbage_pem_is_rejected() {
        let dir = tempdir().unwrap();
        let cert = dir.path().join("server.crt");
        let key = dir.path().join("server.key");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        assert!(matches!(
            load_tls(&cert, &key).await,
            Err(TlsError::Config(_))
        ));
    }
}
