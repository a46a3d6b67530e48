//! TLS material loading for the `secure` listener.

use std::path::{Path, PathBuf};

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;

use crate::config::FortitudeConfig;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("secure mode requires `{0}`")]
    Missing(&'static str),

    #[error("{kind} file not found: {path:?}")]
    NotFound { kind: &'static str, path: PathBuf },

    #[error("failed to load TLS material: {0}")]
    Load(#[from] std::io::Error),
}

/// Load the certificate chain and private key named by the configuration.
pub async fn load_tls_config(config: &FortitudeConfig) -> Result<RustlsConfig, TlsError> {
    let cert = config.secure_cert.as_deref().ok_or(TlsError::Missing("secure_cert"))?;
    let key = config.secure_key.as_deref().ok_or(TlsError::Missing("secure_key"))?;
    load_pem_files(Path::new(cert), Path::new(key)).await
}

/// Load a PEM certificate chain and private key.
pub async fn load_pem_files(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, TlsError> {
    for (kind, path) in [("certificate", cert_path), ("private key", key_path)] {
        if !path.exists() {
            return Err(TlsError::NotFound {
                kind,
                path: path.to_path_buf(),
            });
        }
    }

    let tls = RustlsConfig::from_pem_file(cert_path, key_path).await?;
    tracing::info!(cert = ?cert_path, "TLS material loaded");
    Ok(tls)
}
