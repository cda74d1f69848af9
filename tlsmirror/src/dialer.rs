//! Egress dialing.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{HijackError, NetworkError, Result};
use crate::hijack::BoxedStream;

/// Opens upstream connections on behalf of the hijackers.
///
/// `async_trait` is used to allow usage with dynamic dispatch.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connects to `address` (`host:port`) over `network`.
    async fn dial(&self, network: &str, address: &str) -> Result<BoxedStream>;
}

/// Plain TCP dialer.
#[derive(Debug, Clone)]
pub struct DirectDialer {
    timeout: Duration,
}

impl DirectDialer {
    /// A zero `timeout` leaves the connect attempt unbounded.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, network: &str, address: &str) -> Result<BoxedStream> {
        if network != "tcp" {
            return Err(NetworkError::InvalidAddress {
                address: format!("{network}://{address}"),
            }
            .into());
        }

        let connect = TcpStream::connect(address);
        let connected = if self.timeout.is_zero() {
            connect.await
        } else {
            tokio::time::timeout(self.timeout, connect)
                .await
                .map_err(|_| NetworkError::Timeout {
                    address: address.to_string(),
                })?
        };
        let stream = connected.map_err(|e| HijackError::UpstreamDial {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on upstream connection: {}", e);
        }
        debug!("Dialed {} ({:?})", address, stream.peer_addr().ok());

        Ok(Box::new(stream))
    }
}
