//! Captures the client's ClientHello from the tee shadow.
//!
//! The fingerprinter runs in its own task and reports through a single-slot
//! rendezvous: exactly one of the result or error channel carries the
//! outcome of extraction. After publishing it keeps draining the shadow,
//! since the tee primary only sees bytes the shadow has read.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::client_hello::{parse_handshake, record_body_len, ClientHelloInfo};
use super::fingerprint::FingerprintSpec;
use crate::constants::TLS_RECORD_HEADER_LEN;
use crate::error::{HijackError, MirrorError, Result};
use crate::utils::is_closed_conn_error;

/// Outcome of a successful extraction.
#[derive(Debug, Clone)]
pub struct FingerprintResult {
    pub spec: FingerprintSpec,
    pub alpn_offers: Vec<Vec<u8>>,
}

/// A complete first record plus what was parsed out of it.
pub struct HelloRecord {
    pub bytes: Vec<u8>,
    pub info: ClientHelloInfo,
}

/// Reads exactly one TLS record from `reader` and parses it as a ClientHello.
pub async fn read_hello_record<R: AsyncRead + Unpin>(reader: &mut R) -> Result<HelloRecord> {
    let mut header = [0u8; TLS_RECORD_HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| MirrorError::protocol(format!("TLS header: {e}")))?;
    trace!("TLS header bytes: {:02x?}", header);

    let body_len =
        record_body_len(&header).map_err(|e| MirrorError::protocol(format!("TLS header: {e}")))?;
    trace!("ClientHello length: {}", body_len);

    let mut bytes = Vec::with_capacity(TLS_RECORD_HEADER_LEN + body_len);
    bytes.extend_from_slice(&header);
    bytes.resize(TLS_RECORD_HEADER_LEN + body_len, 0);
    reader
        .read_exact(&mut bytes[TLS_RECORD_HEADER_LEN..])
        .await
        .map_err(|e| MirrorError::protocol(format!("TLS body: {e}")))?;

    let info = parse_handshake(&bytes[TLS_RECORD_HEADER_LEN..])
        .map_err(|e| MirrorError::protocol(e.to_string()))?;

    Ok(HelloRecord { bytes, info })
}

/// Consumer side of the rendezvous.
pub struct FingerprinterHandle {
    result_rx: oneshot::Receiver<FingerprintResult>,
    error_rx: oneshot::Receiver<MirrorError>,
    task: JoinHandle<()>,
}

impl FingerprinterHandle {
    /// Waits for the published outcome. A result always beats an error.
    pub async fn wait(&mut self) -> Result<FingerprintResult> {
        tokio::select! {
            biased;
            Ok(result) = &mut self.result_rx => Ok(result),
            Ok(err) = &mut self.error_rx => Err(HijackError::FingerprintExtraction {
                reason: err.as_hijack().map_or_else(|| err.to_string(), |h| h.to_string()),
            }.into()),
            else => Err(HijackError::FingerprintExtraction {
                reason: "fingerprinter exited without a result".to_string(),
            }.into()),
        }
    }

    /// Stops the fingerprinter, releasing the shadow.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Producer side; the first publication wins and later ones are logged.
struct Publisher {
    result_tx: Option<oneshot::Sender<FingerprintResult>>,
    error_tx: Option<oneshot::Sender<MirrorError>>,
    published: bool,
}

impl Publisher {
    fn result(&mut self, result: FingerprintResult) {
        if self.published {
            debug!("Fingerprint result dropped, outcome already published");
            return;
        }
        self.published = true;
        if let Some(tx) = self.result_tx.take() {
            if tx.send(result).is_err() {
                debug!("Fingerprint result dropped, receiver gone");
            }
        }
    }

    fn error(&mut self, err: MirrorError) {
        if self.published {
            debug!("Fingerprinter error after publishing, dropped: {}", err);
            return;
        }
        self.published = true;
        if let Some(tx) = self.error_tx.take() {
            if let Err(err) = tx.send(err) {
                debug!("Fingerprinter error dropped, receiver gone: {}", err);
            }
        }
    }
}

pub struct Fingerprinter;

impl Fingerprinter {
    /// Spawns the fingerprinter over `shadow`.
    pub fn spawn<R>(shadow: R) -> FingerprinterHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        let publisher = Publisher {
            result_tx: Some(result_tx),
            error_tx: Some(error_tx),
            published: false,
        };

        let task = tokio::spawn(run(shadow, publisher));

        FingerprinterHandle {
            result_rx,
            error_rx,
            task,
        }
    }
}

async fn run<R: AsyncRead + Unpin>(mut shadow: R, mut publisher: Publisher) {
    match read_hello_record(&mut shadow).await {
        Ok(record) => {
            let spec = FingerprintSpec::from_client_hello(&record.info);
            debug!(
                "Client ALPN offers: {:?}, JA3: {}",
                record.info.alpn_protocols(),
                spec.ja3()
            );
            let alpn_offers = spec.alpn_offers.clone();
            publisher.result(FingerprintResult { spec, alpn_offers });
        }
        Err(e) => {
            debug!("Client hello fingerprinting error: {}", e);
            publisher.error(e);
            return;
        }
    }

    trace!("Start sinking ClientHello copy");
    match tokio::io::copy(&mut shadow, &mut tokio::io::sink()).await {
        Ok(n) => trace!("Shadow drained after {} bytes", n),
        Err(e) if is_closed_conn_error(&e) => trace!("Shadow closed: {}", e),
        Err(e) => {
            warn!("Sinking failed, error: {}", e);
            publisher.error(e.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::client_hello::test_records::client_hello;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    const DEADLINE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_extracts_alpn() {
        let (mut client, shadow) = tokio::io::duplex(64 * 1024);
        let mut handle = Fingerprinter::spawn(shadow);

        client
            .write_all(&client_hello(Some("example.com"), &["h2", "http/1.1"]))
            .await
            .unwrap();

        let result = tokio::time::timeout(DEADLINE, handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.alpn_offers, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
        assert_eq!(result.spec.server_name.as_deref(), Some("example.com"));
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_protocol_error() {
        let (mut client, shadow) = tokio::io::duplex(1024);
        let mut handle = Fingerprinter::spawn(shadow);

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let err = tokio::time::timeout(DEADLINE, handle.wait())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, MirrorError::Hijack(HijackError::FingerprintExtraction { .. })));
        assert!(err.to_string().contains("Malformed ClientHello"));
    }

    #[tokio::test]
    async fn test_truncated_body_does_not_block() {
        let (mut client, shadow) = tokio::io::duplex(1024);
        let mut handle = Fingerprinter::spawn(shadow);

        let record = client_hello(Some("example.com"), &["h2"]);
        client.write_all(&record[..40]).await.unwrap();
        drop(client);

        let err = tokio::time::timeout(DEADLINE, handle.wait())
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("TLS body"));
    }

    #[tokio::test]
    async fn test_drains_after_result() {
        let (mut client, shadow) = tokio::io::duplex(1024);
        let mut handle = Fingerprinter::spawn(shadow);

        client
            .write_all(&client_hello(Some("example.com"), &["h2"]))
            .await
            .unwrap();
        tokio::time::timeout(DEADLINE, handle.wait())
            .await
            .unwrap()
            .unwrap();

        // Far more than the pipe holds: only completes if the shadow is drained
        client.write_all(&vec![0u8; 256 * 1024]).await.unwrap();
        drop(client);

        tokio::time::timeout(DEADLINE, &mut handle.task)
            .await
            .unwrap()
            .unwrap();
    }

    /// Yields `data`, then fails every later read with `kind`.
    struct FailingAfter {
        data: Vec<u8>,
        kind: std::io::ErrorKind,
    }

    impl AsyncRead for FailingAfter {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.data.is_empty() {
                return std::task::Poll::Ready(Err(self.kind.into()));
            }
            let n = self.data.len().min(buf.remaining());
            buf.put_slice(&self.data[..n]);
            self.data.drain(..n);
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_drain_error_after_result_is_dropped() {
        let shadow = FailingAfter {
            data: client_hello(Some("example.com"), &["h2"]),
            kind: std::io::ErrorKind::TimedOut,
        };
        let mut handle = Fingerprinter::spawn(shadow);

        // The drain error lands before anyone waits
        tokio::time::timeout(DEADLINE, &mut handle.task)
            .await
            .unwrap()
            .unwrap();

        let result = handle.wait().await.unwrap();
        assert_eq!(result.alpn_offers, vec![b"h2".to_vec()]);
    }

    #[tokio::test]
    async fn test_first_publication_wins() {
        let (result_tx, result_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        let mut publisher = Publisher {
            result_tx: Some(result_tx),
            error_tx: Some(error_tx),
            published: false,
        };
        let mut handle = FingerprinterHandle {
            result_rx,
            error_rx,
            task: tokio::spawn(async {}),
        };

        publisher.result(FingerprintResult {
            spec: FingerprintSpec::default(),
            alpn_offers: vec![b"http/1.1".to_vec()],
        });
        publisher.error(MirrorError::timeout("drain"));

        let result = handle.wait().await.unwrap();
        assert_eq!(result.alpn_offers, vec![b"http/1.1".to_vec()]);
    }

    #[tokio::test]
    async fn test_read_hello_record_keeps_bytes() {
        let record = client_hello(None, &["h2"]);
        let mut reader = &record[..];
        let hello = read_hello_record(&mut reader).await.unwrap();
        assert_eq!(hello.bytes, record);
        assert_eq!(hello.info.sni, None);
    }
}
