//! CA, trust store and leaf issuance errors.

use std::path::PathBuf;
use thiserror::Error;

/// Loading failures are fatal at startup; issuance failures end one tunnel.
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("Failed to load certificate from {path}")]
    LoadFailed { path: PathBuf },

    #[error("Failed to load private key from {path}")]
    PrivateKeyLoadFailed { path: PathBuf },

    /// Input is neither a PEM certificate nor a PEM bundle
    #[error("Unsupported certificate format")]
    UnsupportedFormat,

    #[error("Leaf certificate generation failed: {reason}")]
    GenerationFailed { reason: String },

    /// Leaf request carried neither DNS names nor IP addresses
    #[error("Leaf request has no subject alternative names")]
    EmptyRequest,

    #[error("BoringSSL error: {message}")]
    Ssl { message: String },
}
