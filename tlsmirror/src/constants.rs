//! Protocol constants shared across the proxy.

use std::time::Duration;

/// Response written to the raw client once the tunnel is taken over.
pub const TUNNEL_ESTABLISHED_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// TLS record header length (content type, legacy version, length).
pub const TLS_RECORD_HEADER_LEN: usize = 5;

/// ContentType::Handshake
pub const TLS_HANDSHAKE_CONTENT_TYPE: u8 = 0x16;

/// Capacity of the in-memory pipe between the tee shadow and primary.
pub const TEE_PIPE_CAPACITY: usize = 64 * 1024;

/// Maximum size of a CONNECT request head.
pub const MAX_REQUEST_HEAD_SIZE: usize = 8 * 1024;

/// Time a client gets to send its CONNECT request head, unless configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of headers in a CONNECT request head.
pub const MAX_REQUEST_HEADERS: usize = 64;

/// Leaf certificates are backdated by this many days.
pub const LEAF_BACKDATE_DAYS: u64 = 7;

/// Leaf certificates stay valid for this many days after issuance.
/// Keeps the full window under the 13-month ceiling clients enforce.
pub const LEAF_VALIDITY_DAYS: u64 = 314;

/// Organization written into every leaf subject.
pub const LEAF_ORGANIZATION: &str = "tlsmirror";

/// Buffer size of each relay copy loop.
pub const RELAY_BUFFER_SIZE: usize = 32 * 1024;
