//! Response writers and the hijacked response wrapper.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use hyper::{HeaderMap, Response, StatusCode};
use hyper::body::Frame;
use http_body_util::StreamBody;
use tokio::sync::{mpsc, oneshot};

use crate::error::TransportError;
use crate::gate::{Decision, decide};
use crate::hooks::{Hook, TransportPath};
use crate::registry::FailpointRegistry;
use crate::underlying::Underlying;

/// Handler-side view of an HTTP response being written.
///
/// Headers are staged through [`headers_mut`](Self::headers_mut) and sent
/// with the status by [`write_header`](Self::write_header). The first
/// [`write`](Self::write) sends an implicit `200 OK` when no status was
/// written.
#[async_trait]
pub trait ResponseWriter: Send {
    /// Headers to send with the status line.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Send the status line and staged headers. Only the first call counts.
    async fn write_header(&mut self, status: StatusCode);

    /// Write body bytes, returning how many were accepted.
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Push buffered bytes to the peer.
    ///
    /// Writers without a flush capability keep the default, which does
    /// nothing.
    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A [`ResponseWriter`] that reports success while discarding output when
/// its failpoints are armed.
///
/// The status line and the body are governed by separate failpoints so a
/// test can drop either. Flush always passes through. A detached writer
/// accepts nothing: writes return `Ok(0)`.
#[derive(Debug)]
pub struct HijackedResponseWriter<W> {
    inner: Underlying<W>,
    registry: Arc<FailpointRegistry>,
    header_failpoint: String,
    body_failpoint: String,
    detached_headers: HeaderMap,
}

impl<W> HijackedResponseWriter<W>
where
    W: ResponseWriter,
{
    /// Wrap `inner` with explicit failpoint names.
    pub fn new(
        inner: W,
        registry: Arc<FailpointRegistry>,
        header_failpoint: impl Into<String>,
        body_failpoint: impl Into<String>,
    ) -> Self {
        Self {
            inner: Underlying::Attached(inner),
            registry,
            header_failpoint: header_failpoint.into(),
            body_failpoint: body_failpoint.into(),
            detached_headers: HeaderMap::new(),
        }
    }

    /// Wrap `inner` with the response hooks of `path`.
    ///
    /// The status line and the body are separate hooks. Dropping a whole
    /// response takes both: with only the body hook armed the peer still
    /// receives the status line and headers, followed by an empty body.
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use faultline_failpoint::{
    ///     ChannelResponseWriter, FailpointAction, FailpointRegistry, HijackedResponseWriter, Hook,
    ///     ResponseWriter, TransportPath,
    /// };
    /// use hyper::StatusCode;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let registry = Arc::new(FailpointRegistry::new());
    /// let path = TransportPath::Stream;
    /// registry.arm(path.failpoint(Hook::ResponseHeader), FailpointAction::Drop);
    /// registry.arm(path.failpoint(Hook::ResponseBody), FailpointAction::Drop);
    ///
    /// let (writer, pending) = ChannelResponseWriter::new();
    /// let mut writer = HijackedResponseWriter::for_path(writer, registry, path);
    /// writer.write_header(StatusCode::CREATED).await;
    /// assert_eq!(writer.write(b"entries").await.unwrap(), 7);
    /// drop(writer);
    ///
    /// // Only the implicit head of the real writer goes out.
    /// let response = pending.into_response().await.unwrap();
    /// assert_eq!(response.status(), StatusCode::OK);
    /// # }
    /// ```
    pub fn for_path(inner: W, registry: Arc<FailpointRegistry>, path: TransportPath) -> Self {
        Self::new(
            inner,
            registry,
            path.failpoint(Hook::ResponseHeader),
            path.failpoint(Hook::ResponseBody),
        )
    }

    /// A writer with nothing behind it.
    pub fn detached(registry: Arc<FailpointRegistry>, path: TransportPath) -> Self {
        Self {
            inner: Underlying::Detached,
            registry,
            header_failpoint: path.failpoint(Hook::ResponseHeader).to_string(),
            body_failpoint: path.failpoint(Hook::ResponseBody).to_string(),
            detached_headers: HeaderMap::new(),
        }
    }

    /// Release the underlying writer. A no-op when already detached.
    pub fn close(&mut self) {
        self.inner.take();
    }

    /// Unwrap the underlying writer, if any.
    pub fn into_inner(self) -> Option<W> {
        self.inner.into_inner()
    }
}

#[async_trait]
impl<W> ResponseWriter for HijackedResponseWriter<W>
where
    W: ResponseWriter,
{
    fn headers_mut(&mut self) -> &mut HeaderMap {
        match &mut self.inner {
            Underlying::Attached(inner) => inner.headers_mut(),
            Underlying::Detached => &mut self.detached_headers,
        }
    }

    async fn write_header(&mut self, status: StatusCode) {
        if !self.inner.is_attached() {
            return;
        }
        if decide(&self.registry, &self.header_failpoint).await == Decision::Drop {
            tracing::debug!(failpoint = %self.header_failpoint, %status, "dropped response header");
            return;
        }
        if let Some(inner) = self.inner.as_mut() {
            inner.write_header(status).await;
        }
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.inner.is_attached() {
            return Ok(0);
        }
        if decide(&self.registry, &self.body_failpoint).await == Decision::Drop {
            tracing::debug!(failpoint = %self.body_failpoint, len = buf.len(), "dropped response write");
            return Ok(buf.len());
        }
        match self.inner.as_mut() {
            Some(inner) => inner.write(buf).await,
            None => Ok(0),
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush().await,
            None => Ok(()),
        }
    }
}

/// Body type produced by [`PendingResponse`].
pub type ResponseBody = StreamBody<BoxStream<'static, Result<Frame<Bytes>, Infallible>>>;

type Head = (StatusCode, HeaderMap);

/// A [`ResponseWriter`] that feeds a streaming hyper response.
///
/// Writes are buffered until [`flush`](ResponseWriter::flush). Dropping the
/// writer flushes what is left and sends a `200 OK` head if no status was
/// written.
#[derive(Debug)]
pub struct ChannelResponseWriter {
    headers: HeaderMap,
    head: Option<oneshot::Sender<Head>>,
    body: mpsc::UnboundedSender<Bytes>,
    buffer: BytesMut,
}

/// The response side of a [`ChannelResponseWriter`].
#[derive(Debug)]
pub struct PendingResponse {
    head: oneshot::Receiver<Head>,
    body: mpsc::UnboundedReceiver<Bytes>,
}

impl ChannelResponseWriter {
    /// Create a writer and the response it produces.
    pub fn new() -> (Self, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();
        (
            Self {
                headers: HeaderMap::new(),
                head: Some(head_tx),
                body: body_tx,
                buffer: BytesMut::new(),
            },
            PendingResponse {
                head: head_rx,
                body: body_rx,
            },
        )
    }

    fn send_head(&mut self, status: StatusCode) {
        if let Some(head) = self.head.take() {
            let headers = std::mem::take(&mut self.headers);
            // The receiver being gone means the connection was dropped.
            let _ = head.send((status, headers));
        }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        self.body
            .send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response receiver dropped"))
    }
}

#[async_trait]
impl ResponseWriter for ChannelResponseWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    async fn write_header(&mut self, status: StatusCode) {
        if self.head.is_none() {
            tracing::trace!(%status, "superfluous write_header");
            return;
        }
        self.send_head(status);
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send_head(StatusCode::OK);
        if self.body.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "response receiver dropped",
            ));
        }
        self.buffer.extend_from_slice(buf);
        tracing::trace!(len = buf.len(), "buffered response write");
        Ok(buf.len())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.send_head(StatusCode::OK);
        self.send_buffer()
    }
}

impl Drop for ChannelResponseWriter {
    fn drop(&mut self) {
        self.send_head(StatusCode::OK);
        let _ = self.send_buffer();
    }
}

impl PendingResponse {
    /// Wait for the head and return a response streaming the body.
    pub async fn into_response(self) -> Result<Response<ResponseBody>, TransportError> {
        let (status, headers) = self.head.await.map_err(|_| TransportError::Closed)?;

        let frames = stream::unfold(self.body, |mut body| async move {
            let chunk = body.recv().await?;
            Some((Ok(Frame::data(chunk)), body))
        })
        .boxed();

        let mut response = Response::new(StreamBody::new(frames));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FailpointAction;
    use http_body_util::BodyExt;

    #[derive(Debug, Default)]
    struct RecordingWriter {
        headers: HeaderMap,
        status: Option<StatusCode>,
        written: Vec<u8>,
        flushes: usize,
    }

    #[async_trait]
    impl ResponseWriter for RecordingWriter {
        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        async fn write_header(&mut self, status: StatusCode) {
            self.status.get_or_insert(status);
        }

        async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct NoFlushWriter {
        headers: HeaderMap,
    }

    #[async_trait]
    impl ResponseWriter for NoFlushWriter {
        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        async fn write_header(&mut self, _status: StatusCode) {}

        async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
    }

    #[tokio::test]
    async fn test_disarmed_writer_passes_through() {
        let registry = Arc::new(FailpointRegistry::new());
        let mut writer =
            HijackedResponseWriter::for_path(RecordingWriter::default(), registry, TransportPath::Stream);

        writer.write_header(StatusCode::CREATED).await;
        assert_eq!(writer.write(b"abc").await.expect("write"), 3);
        writer.flush().await.expect("flush");

        let inner = writer.into_inner().expect("attached");
        assert_eq!(inner.status, Some(StatusCode::CREATED));
        assert_eq!(inner.written, b"abc");
        assert_eq!(inner.flushes, 1);
    }

    #[tokio::test]
    async fn test_armed_writer_reports_success_and_writes_nothing() {
        let registry = Arc::new(FailpointRegistry::new());
        let path = TransportPath::Pipeline;
        registry.arm(path.failpoint(Hook::ResponseHeader), FailpointAction::Drop);
        registry.arm(path.failpoint(Hook::ResponseBody), FailpointAction::Drop);
        let mut writer =
            HijackedResponseWriter::for_path(RecordingWriter::default(), registry, path);

        writer.write_header(StatusCode::OK).await;
        assert_eq!(writer.write(&[1u8; 50]).await.expect("write"), 50);
        writer.flush().await.expect("flush");

        let inner = writer.into_inner().expect("attached");
        assert_eq!(inner.status, None);
        assert!(inner.written.is_empty());
        assert_eq!(inner.flushes, 1, "flush is never hijacked");
    }

    #[tokio::test]
    async fn test_header_and_body_failpoints_are_independent() {
        let registry = Arc::new(FailpointRegistry::new());
        registry.arm("hdr", FailpointAction::Drop);
        let mut writer =
            HijackedResponseWriter::new(RecordingWriter::default(), registry, "hdr", "body");

        writer.write_header(StatusCode::ACCEPTED).await;
        writer.write(b"kept").await.expect("write");

        let inner = writer.into_inner().expect("attached");
        assert_eq!(inner.status, None);
        assert_eq!(inner.written, b"kept");
    }

    #[tokio::test]
    async fn test_body_only_drop_still_sends_head() {
        let registry = Arc::new(FailpointRegistry::new());
        let path = TransportPath::Stream;
        registry.arm(path.failpoint(Hook::ResponseBody), FailpointAction::Drop);

        let (writer, pending) = ChannelResponseWriter::new();
        let mut writer = HijackedResponseWriter::for_path(writer, registry, path);
        writer.write_header(StatusCode::ACCEPTED).await;
        assert_eq!(writer.write(&[0u8; 50]).await.expect("write"), 50);
        drop(writer);

        let response = pending.into_response().await.expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = BodyExt::collect(response.into_body())
            .await
            .expect("collect")
            .to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_flush_without_capability_is_noop() {
        let registry = Arc::new(FailpointRegistry::new());
        let mut writer =
            HijackedResponseWriter::for_path(NoFlushWriter::default(), registry, TransportPath::Stream);
        writer.flush().await.expect("flush");
    }

    #[tokio::test]
    async fn test_detached_writer_accepts_nothing() {
        let registry = Arc::new(FailpointRegistry::new());
        let mut writer =
            HijackedResponseWriter::<RecordingWriter>::detached(registry, TransportPath::Stream);

        writer.headers_mut().insert("x-a", "b".parse().expect("header value"));
        writer.write_header(StatusCode::OK).await;
        assert_eq!(writer.write(b"abc").await.expect("write"), 0);
        writer.flush().await.expect("flush");
        writer.close();
        assert!(writer.into_inner().is_none());
    }

    #[tokio::test]
    async fn test_channel_writer_streams_response() {
        let (mut writer, pending) = ChannelResponseWriter::new();
        writer
            .headers_mut()
            .insert("content-type", "text/plain".parse().expect("header value"));
        writer.write_header(StatusCode::ACCEPTED).await;
        writer.write(b"hello ").await.expect("write");
        writer.flush().await.expect("flush");
        writer.write(b"world").await.expect("write");
        drop(writer);

        let response = pending.into_response().await.expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["content-type"], "text/plain");
        let body = BodyExt::collect(response.into_body())
            .await
            .expect("collect")
            .to_bytes();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_channel_writer_implicit_ok() {
        let (writer, pending) = ChannelResponseWriter::new();
        drop(writer);

        let response = pending.into_response().await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = BodyExt::collect(response.into_body())
            .await
            .expect("collect")
            .to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_channel_writer_fails_after_receiver_dropped() {
        let (mut writer, pending) = ChannelResponseWriter::new();
        drop(pending);
        assert!(writer.write(b"x").await.is_err());
    }
}
