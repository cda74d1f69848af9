//! Bidirectional relay between the two legs of a hijacked connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::constants::RELAY_BUFFER_SIZE;
use crate::hijack::ConnectionPair;
use crate::utils::is_closed_conn_error;

/// Bytes copied in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_server: u64,
    pub server_to_client: u64,
}

/// Idempotent close signal shared by both copy loops.
pub struct CloseOnce {
    closed: AtomicBool,
    signal: watch::Sender<bool>,
}

impl Default for CloseOnce {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseOnce {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            closed: AtomicBool::new(false),
            signal,
        }
    }

    /// Returns true only for the call that performed the close.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.signal.send_replace(true);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once `close` has been called, including before this call.
    pub async fn closed(&self) {
        let mut rx = self.signal.subscribe();
        // The sender lives in self, so the channel cannot be dropped while waiting
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Pipes bytes between both legs until either side ends, then closes both.
pub async fn relay(pair: ConnectionPair) -> RelayStats {
    let (client_read, client_write) = tokio::io::split(pair.client);
    let (server_read, server_write) = tokio::io::split(pair.server);
    let close = Arc::new(CloseOnce::new());

    let upstream = tokio::spawn(pipe("client->server", client_read, server_write, close.clone()));
    let downstream = tokio::spawn(pipe("server->client", server_read, client_write, close));

    let (client_to_server, server_to_client) = tokio::join!(upstream, downstream);
    let stats = RelayStats {
        client_to_server: client_to_server.unwrap_or_else(|e| {
            warn!("Relay task failed: {}", e);
            0
        }),
        server_to_client: server_to_client.unwrap_or_else(|e| {
            warn!("Relay task failed: {}", e);
            0
        }),
    };
    debug!(
        "Relay finished: {} bytes up, {} bytes down",
        stats.client_to_server, stats.server_to_client
    );
    stats
}

async fn pipe<R, W>(direction: &'static str, mut reader: R, mut writer: W, close: Arc<CloseOnce>) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied = 0u64;
    let result = tokio::select! {
        result = copy_counted(&mut reader, &mut writer, &mut copied) => result,
        _ = close.closed() => Ok(()),
    };

    match result {
        Ok(()) => trace!("{} finished after {} bytes", direction, copied),
        Err(e) if is_closed_conn_error(&e) => trace!("{} closed: {}", direction, e),
        Err(e) => warn!("{} failed after {} bytes: {}", direction, copied, e),
    }

    if close.close() {
        debug!("{} ended first, closing both legs", direction);
    }

    if let Err(e) = writer.shutdown().await {
        if !is_closed_conn_error(&e) {
            warn!("{} shutdown failed: {}", direction, e);
        }
    }
    copied
}

async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return writer.flush().await;
        }
        writer.write_all(&buf[..n]).await?;
        *copied += n as u64;
    }
}
