//! TLS-intercepting mirroring proxy.
//!
//! Inbound CONNECT tunnels are terminated under a locally issued leaf
//! certificate while the outbound handshake reproduces the original client's
//! ClientHello shape.

pub mod cert_generator;
pub mod certificates;
pub mod config;
pub mod constants;
pub mod dialer;
pub mod error;
pub mod hijack;
pub mod relay;
pub mod server;
pub mod tls;
pub mod utils;

pub use error::{MirrorError, Result};
