//! Fan-out of one inbound byte stream into two readers.
//!
//! The shadow drives reads from the connection. Every chunk it reads is also
//! pushed into a bounded in-memory pipe that the primary reads from, so the
//! primary sees exactly the bytes the shadow consumed, in order. Writes on the
//! primary go straight to the connection.
//!
//! The shadow must be drained: once the pipe is full the shadow stops reading
//! and the primary stalls with it. Shutting down or dropping the primary makes
//! the shadow's next read fail with `NotConnected`, which ends its drain.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BytesMut};
use futures::task::AtomicWaker;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf, ReadHalf, WriteHalf};
use tracing::trace;

use crate::constants::TEE_PIPE_CAPACITY;

#[derive(Default)]
struct TeeState {
    closed: AtomicBool,
    shadow_waker: AtomicWaker,
}

impl TeeState {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            trace!("Tee closed");
            self.shadow_waker.wake();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pub struct TeeStream;

impl TeeStream {
    /// Splits `conn` into the primary and shadow readers.
    pub fn wrap<S>(conn: S) -> (TeePrimary<S>, TeeShadow<S>)
    where
        S: AsyncRead + AsyncWrite,
    {
        let (reader, writer) = tokio::io::split(conn);
        let (pipe_rx, pipe_tx) = tokio::io::duplex(TEE_PIPE_CAPACITY);
        let state = Arc::new(TeeState::default());

        let primary = TeePrimary {
            pipe: pipe_rx,
            writer,
            state: state.clone(),
        };
        let shadow = TeeShadow {
            reader,
            pipe: pipe_tx,
            pending: BytesMut::new(),
            eof: false,
            state,
        };
        (primary, shadow)
    }
}

/// Reads the duplicated bytes and writes to the connection.
pub struct TeePrimary<S> {
    pipe: DuplexStream,
    writer: WriteHalf<S>,
    state: Arc<TeeState>,
}

impl<S> TeePrimary<S> {
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

impl<S> Drop for TeePrimary<S> {
    fn drop(&mut self) {
        self.state.close();
    }
}

impl<S: AsyncRead + AsyncWrite> AsyncRead for TeePrimary<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().pipe).poll_read(cx, buf)
    }
}

impl<S: AsyncRead + AsyncWrite> AsyncWrite for TeePrimary<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.state.close();
        Pin::new(&mut this.writer).poll_shutdown(cx)
    }
}

/// Drives reads from the connection and mirrors them to the primary.
pub struct TeeShadow<S> {
    reader: ReadHalf<S>,
    pipe: DuplexStream,
    /// Bytes handed to the shadow consumer but not yet accepted by the pipe.
    pending: BytesMut,
    eof: bool,
    state: Arc<TeeState>,
}

impl<S> TeeShadow<S> {
    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "tee primary closed")
    }

    fn poll_flush_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            match ready!(Pin::new(&mut self.pipe).poll_write(cx, &self.pending)) {
                Ok(0) => return Poll::Ready(Err(Self::closed_error())),
                Ok(n) => self.pending.advance(n),
                Err(e) => {
                    trace!("Tee pipe write failed: {}", e);
                    self.state.close();
                    return Poll::Ready(Err(Self::closed_error()));
                }
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + AsyncWrite> AsyncRead for TeeShadow<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        this.state.shadow_waker.register(cx.waker());
        if this.state.is_closed() {
            return Poll::Ready(Err(Self::closed_error()));
        }

        // The primary must have taken everything from the previous read first
        ready!(this.poll_flush_pending(cx))?;

        if this.eof {
            return Pin::new(&mut this.pipe).poll_shutdown(cx);
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.reader).poll_read(cx, buf))?;
        let chunk = &buf.filled()[before..];

        if chunk.is_empty() {
            trace!("Tee source reached EOF");
            this.eof = true;
            // EOF is still reported to the shadow consumer if the pipe lags
            let _ = Pin::new(&mut this.pipe).poll_shutdown(cx);
            return Poll::Ready(Ok(()));
        }

        this.pending.extend_from_slice(chunk);
        // A broken pipe surfaces on the next read, this chunk is already delivered
        let _ = this.poll_flush_pending(cx);
        Poll::Ready(Ok(()))
    }
}
