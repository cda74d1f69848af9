//! Network communication errors.

use thiserror::Error;

/// Network communication errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection was unexpectedly closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Network timeout occurred
    #[error("Network operation to {address} timed out")]
    Timeout { address: String },

    /// Invalid network address or unsupported network kind
    #[error("Invalid network address: {address}")]
    InvalidAddress { address: String },

    /// Listener binding failed
    #[error("Bind failed: {address}")]
    BindFailed { address: String },

    /// Malformed proxy request from the client
    #[error("Malformed proxy request: {reason}")]
    BadRequest { reason: String },
}
