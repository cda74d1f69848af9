//! Per-connection interception errors.

use thiserror::Error;

/// Errors raised while turning one intercepted tunnel into two plaintext legs.
///
/// All of these are scoped to a single connection: the handler logs them and
/// closes both legs.
#[derive(Error, Debug)]
pub enum HijackError {
    /// The first client record is not a well-formed ClientHello
    #[error("Malformed ClientHello: {reason}")]
    Protocol { reason: String },

    /// Egress dial failed
    #[error("Upstream dial to {address} failed: {reason}")]
    UpstreamDial { address: String, reason: String },

    /// TLS handshake with the real destination failed
    #[error("Upstream handshake with '{server_name}' failed: {reason}")]
    UpstreamHandshake { server_name: String, reason: String },

    /// The fingerprinter reported an error instead of a spec
    #[error("Fingerprint extraction failed: {reason}")]
    FingerprintExtraction { reason: String },

    /// Neither SNI nor a hostname is available and insecure mode is off
    #[error("No SNI or hostname for {target} and insecure connections are not allowed")]
    InsecureConnectionRequired { target: String },

    /// TLS handshake with the intercepted client failed
    #[error("Client handshake failed: {reason}")]
    Handshake { reason: String },

    /// A handshake stage exceeded its deadline
    #[error("Timed out during {stage}")]
    Timeout { stage: &'static str },
}
