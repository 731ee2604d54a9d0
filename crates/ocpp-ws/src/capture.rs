//! Raw-byte capture for frame diagnostics.
//!
//! The WebSocket frame parser consumes its input, so when it rejects a
//! malformed frame the offending bytes are gone. [`FrameCapture`] wraps
//! the transport stream and retains a copy of the most recent read, which
//! the listener dumps as hex at debug level when frame translation fails.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Upper bound on retained bytes per read.
const CAPTURE_LIMIT: usize = 1024;

/// Shared handle onto the most recently read bytes.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    bytes: Mutex<Vec<u8>>,
}

impl CaptureBuffer {
    fn record(&self, chunk: &[u8]) {
        let mut bytes = self.bytes.lock();
        bytes.clear();
        bytes.extend_from_slice(&chunk[..chunk.len().min(CAPTURE_LIMIT)]);
    }

    /// Lowercase hex of the retained bytes.
    pub fn hex(&self) -> String {
        hex::encode(&*self.bytes.lock())
    }
}

/// Transport stream wrapper that mirrors every read into a
/// [`CaptureBuffer`]. Writes pass through untouched.
pub struct FrameCapture<S> {
    inner: S,
    tail: Arc<CaptureBuffer>,
}

impl<S> FrameCapture<S> {
    /// Wrap `inner`, returning the wrapper and its capture handle.
    pub fn new(inner: S) -> (Self, Arc<CaptureBuffer>) {
        let tail = Arc::new(CaptureBuffer::default());
        (
            Self {
                inner,
                tail: Arc::clone(&tail),
            },
            tail,
        )
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for FrameCapture<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = result {
            let filled = buf.filled();
            if filled.len() > before {
                this.tail.record(&filled[before..]);
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for FrameCapture<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
