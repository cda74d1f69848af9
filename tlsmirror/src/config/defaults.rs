//! Default value functions for serde deserialization.

use std::net::SocketAddr;
use std::path::PathBuf;

use super::HijackMode;

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

pub fn default_mode() -> HijackMode {
    HijackMode::Mitm
}

pub fn default_dial_timeout_s() -> u64 {
    5
}

pub fn default_handshake_timeout_s() -> u64 {
    30
}

pub fn default_false_fn() -> bool {
    false
}

pub fn default_trusted_certificate_paths() -> Vec<PathBuf> {
    Vec::new()
}

pub fn default_trusted_certificates() -> Vec<String> {
    Vec::new()
}

pub fn default_local_alpn_protocols() -> Vec<String> {
    Vec::new()
}
