//! Proxy listener.
//!
//! Accepts tunnels, hands each one to the configured hijacker and relays the
//! resulting legs until either side ends.

pub mod request;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{HijackMode, ProxyConfig};
use crate::constants::DEFAULT_REQUEST_TIMEOUT;
use crate::dialer::{Dialer, DirectDialer};
use crate::error::{NetworkError, Result};
use crate::hijack::{build_hijacker, BoxedStream, Hijacker, PrefixedStream, TargetAddr};
use crate::relay::relay;

use self::request::read_connect_request;

/// How an accepted connection names its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A CONNECT request head precedes the tunnel
    Connect,
    /// TLS from the first byte, always towards the same target
    Transparent(TargetAddr),
}

/// Accepts connections and feeds them to a hijacker.
pub struct ProxyServer {
    listen_address: SocketAddr,
    hijacker: Arc<dyn Hijacker>,
    admission: Admission,
    request_timeout: Duration,
}

impl ProxyServer {
    /// A CONNECT listener.
    pub fn new(listen_address: SocketAddr, hijacker: Arc<dyn Hijacker>) -> Self {
        Self {
            listen_address,
            hijacker,
            admission: Admission::Connect,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_admission(mut self, admission: Admission) -> Self {
        self.admission = admission;
        self
    }

    /// Bounds how long a client may take to send its request head.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Loads all startup material and builds the hijacker for `config.mode`.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let dialer = Arc::new(DirectDialer::new(config.dial_timeout()));
        Self::from_config_with_dialer(config, dialer)
    }

    pub fn from_config_with_dialer(config: &ProxyConfig, dialer: Arc<dyn Dialer>) -> Result<Self> {
        let hijacker = build_hijacker(config, dialer)?;
        let admission = match config.mode {
            HijackMode::Transparent => Admission::Transparent(config.transparent_target()?),
            HijackMode::Passthrough | HijackMode::Mitm => Admission::Connect,
        };
        Ok(Self::new(config.listen_address, hijacker)
            .with_admission(admission)
            .with_request_timeout(config.handshake_timeout()))
    }

    /// Binds the listen address and serves until Ctrl-C or SIGTERM.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_address)
            .await
            .map_err(|e| NetworkError::BindFailed {
                address: format!("{}: {}", self.listen_address, e),
            })?;
        match &self.admission {
            Admission::Connect => info!("Listening for CONNECT requests on {}", self.listen_address),
            Admission::Transparent(target) => info!(
                "Listening on {}, intercepting every connection towards {}",
                self.listen_address, target
            ),
        }

        self.serve(listener, shutdown_signal()).await
    }

    /// Serves connections from `listener` until `shutdown` resolves.
    pub async fn serve(&self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut connection_tasks = FuturesUnordered::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (tcp_stream, remote_addr) = match accept_result {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Failed to accept TCP connection: {e}");
                            continue;
                        }
                    };

                    debug!("Received incoming connection from '{}'", remote_addr);
                    if let Err(e) = tcp_stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY on incoming connection: {}", e);
                    }

                    let hijacker = self.hijacker.clone();
                    let admission = self.admission.clone();
                    let request_timeout = self.request_timeout;
                    connection_tasks.push(tokio::spawn(
                        handle_connection(tcp_stream, hijacker, admission, request_timeout)
                            .instrument(info_span!("conn", peer = %remote_addr)),
                    ));
                }

                Some(result) = connection_tasks.next() => {
                    if let Err(e) = result {
                        warn!("Connection task failed: {e}");
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutting down, aborting {} open connections", connection_tasks.len());
                    for task in connection_tasks.iter() {
                        task.abort();
                    }
                    return Ok(());
                }
            }
        }
    }
}

/// Reads and answers the CONNECT head. `None` means the connection is done.
async fn admit_connect(
    mut stream: TcpStream,
    request_timeout: Duration,
) -> Option<(TargetAddr, BoxedStream)> {
    let request = match tokio::time::timeout(request_timeout, read_connect_request(&mut stream)).await {
        Ok(Ok(Ok(request))) => request,
        Ok(Ok(Err(rejection))) => {
            debug!("Rejecting request: {}", NetworkError::from(rejection.clone()));
            if let Err(e) = stream.write_all(rejection.response()).await {
                debug!("Failed to send rejection: {}", e);
            }
            if let Err(e) = stream.shutdown().await {
                debug!("Failed to close rejected connection: {}", e);
            }
            return None;
        }
        Ok(Err(e)) => {
            debug!("Failed to read request head: {}", e);
            return None;
        }
        Err(_) => {
            debug!("No request head within {:?}, closing", request_timeout);
            return None;
        }
    };

    let client: BoxedStream = if request.leftover.is_empty() {
        Box::new(stream)
    } else {
        Box::new(PrefixedStream::new(request.leftover, stream))
    };
    Some((request.target, client))
}

/// Runs one tunnel from admission to relay end. Errors stop here.
async fn handle_connection(
    stream: TcpStream,
    hijacker: Arc<dyn Hijacker>,
    admission: Admission,
    request_timeout: Duration,
) {
    let (target, client) = match admission {
        Admission::Transparent(target) => (target, Box::new(stream) as BoxedStream),
        Admission::Connect => match admit_connect(stream, request_timeout).await {
            Some(admitted) => admitted,
            None => return,
        },
    };

    async {
        info!("Tunnel requested");
        match hijacker.get_conns(&target, client).await {
            Ok(pair) => {
                let stats = relay(pair).await;
                info!(
                    "Tunnel closed ({} bytes up, {} bytes down)",
                    stats.client_to_server, stats.server_to_client
                );
            }
            Err(e) => warn!("Tunnel to {} failed: {}", target, e),
        }
    }
    .instrument(info_span!("tunnel", target = %target))
    .await
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => stream.recv().await,
                Err(_) => std::future::pending::<Option<()>>().await,
            }
        };

        tokio::select! {
            _ = ctrl_c => { info!("Received Ctrl+C, shutting down..."); },
            _ = terminate => { info!("Received SIGTERM, shutting down..."); },
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("Received Ctrl+C, shutting down...");
    }
}
