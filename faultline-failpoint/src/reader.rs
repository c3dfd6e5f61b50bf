//! Hijacked inbound byte stream.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, ReadBuf};

use crate::gate::{Decision, Gate};
use crate::registry::FailpointRegistry;
use crate::underlying::Underlying;

const DRAIN_CHUNK: usize = 8 * 1024;

/// An [`AsyncRead`] that silently drains its source while a failpoint is
/// armed.
///
/// Disarmed, every read passes through unchanged, errors included. Armed
/// (drop or sleep), a read consumes the source into a scratch buffer until
/// it would block and delivers nothing: the caller stays pending while the
/// peer keeps writing, and sees end-of-stream only once the source ends.
/// Errors from the source are returned even while armed.
#[derive(Debug)]
pub struct HijackedReader<R> {
    inner: Underlying<R>,
    gate: Gate,
    scratch: Vec<u8>,
}

impl<R> HijackedReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap `inner`, consulting `failpoint` in `registry` before each read.
    pub fn new(inner: R, registry: Arc<FailpointRegistry>, failpoint: impl Into<String>) -> Self {
        Self::with_underlying(Underlying::Attached(inner), registry, failpoint)
    }

    /// A reader with no source. Every read reports end-of-stream.
    pub fn detached(registry: Arc<FailpointRegistry>, failpoint: impl Into<String>) -> Self {
        Self::with_underlying(Underlying::Detached, registry, failpoint)
    }

    fn with_underlying(
        inner: Underlying<R>,
        registry: Arc<FailpointRegistry>,
        failpoint: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            gate: Gate::new(registry, failpoint.into()),
            scratch: Vec::new(),
        }
    }

    /// Release the source. A no-op when already detached.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::trace!(failpoint = %self.gate.name(), "hijacked reader closed");
        }
    }

    /// Whether a source is still attached.
    pub fn is_attached(&self) -> bool {
        self.inner.is_attached()
    }

    /// Unwrap the source, if any.
    pub fn into_inner(self) -> Option<R> {
        self.inner.into_inner()
    }
}

impl<R> AsyncRead for HijackedReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        match ready!(this.gate.poll_decide(cx)) {
            Decision::Pass => {
                let result = ready!(Pin::new(inner).poll_read(cx, buf));
                this.gate.reset();
                Poll::Ready(result)
            }
            Decision::Drop => {
                if this.scratch.is_empty() {
                    this.scratch.resize(DRAIN_CHUNK, 0);
                }
                let mut dropped = 0usize;
                loop {
                    let mut scratch = ReadBuf::new(&mut this.scratch[..]);
                    match Pin::new(&mut *inner).poll_read(cx, &mut scratch) {
                        Poll::Pending => {
                            // Whatever arrives next is judged afresh.
                            this.gate.reset();
                            if dropped > 0 {
                                log_dropped(this.gate.name(), dropped);
                            }
                            return Poll::Pending;
                        }
                        Poll::Ready(Err(err)) => {
                            this.gate.reset();
                            return Poll::Ready(Err(err));
                        }
                        Poll::Ready(Ok(())) if scratch.filled().is_empty() => {
                            this.gate.reset();
                            if dropped > 0 {
                                log_dropped(this.gate.name(), dropped);
                            }
                            return Poll::Ready(Ok(()));
                        }
                        Poll::Ready(Ok(())) => dropped += scratch.filled().len(),
                    }
                }
            }
        }
    }
}

fn log_dropped(failpoint: &str, dropped: usize) {
    tracing::debug!(failpoint, dropped, "dropped inbound read");
}
