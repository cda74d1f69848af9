//! Transparent listener configuration.

use serde::Deserialize;

/// Transparent interception configuration
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TransparentConfig {
    /// Destination of every accepted connection (host:port)
    pub target: Option<String>,
    /// Leaf identity for clients that send no SNI (default = the target host)
    pub fallback_identity: Option<String>,
}
