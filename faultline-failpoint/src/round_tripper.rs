//! Outbound request transports.

use std::sync::Arc;

use async_trait::async_trait;
use hyper::{Request, Response};
use hyper::body::Body;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use tokio::sync::Mutex;

use crate::body::{HijackedBody, hijack_request};
use crate::error::TransportError;
use crate::hooks::{Hook, TransportPath};
use crate::registry::FailpointRegistry;

/// Sends one request and waits for its response.
#[async_trait]
pub trait RoundTripper<B>: Send + Sync
where
    B: Send + 'static,
{
    /// Body type of responses.
    type ResponseBody;

    /// Send `request` and return the peer's response.
    async fn round_trip(
        &self,
        request: Request<B>,
    ) -> Result<Response<Self::ResponseBody>, TransportError>;
}

/// A [`RoundTripper`] over one hyper HTTP/1 connection.
///
/// Requests are serialized on the connection.
#[derive(Debug)]
pub struct Http1Transport<B> {
    sender: Mutex<SendRequest<B>>,
}

impl<B> Http1Transport<B> {
    /// Use the request half of an established connection.
    pub fn new(sender: SendRequest<B>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

#[async_trait]
impl<B> RoundTripper<B> for Http1Transport<B>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type ResponseBody = Incoming;

    async fn round_trip(&self, request: Request<B>) -> Result<Response<Incoming>, TransportError> {
        let mut sender = self.sender.lock().await;
        sender.ready().await?;
        tracing::trace!(method = %request.method(), uri = %request.uri(), "sending request");
        Ok(sender.send_request(request).await?)
    }
}

/// A [`RoundTripper`] whose request bodies are dropped while a failpoint
/// is armed.
///
/// Only the body is replaced. Method, headers and every other transport
/// behavior go to the inner transport untouched, so the connection stays
/// up and the peer sees an empty request.
#[derive(Debug)]
pub struct HijackedRoundTripper<T> {
    inner: T,
    registry: Arc<FailpointRegistry>,
    failpoint: String,
}

impl<T> HijackedRoundTripper<T> {
    /// Wrap `inner`, hijacking bodies with `failpoint`.
    pub fn new(inner: T, registry: Arc<FailpointRegistry>, failpoint: impl Into<String>) -> Self {
        Self {
            inner,
            registry,
            failpoint: failpoint.into(),
        }
    }

    /// Wrap `inner` with the outbound hook of `path`.
    pub fn for_path(inner: T, registry: Arc<FailpointRegistry>, path: TransportPath) -> Self {
        Self::new(inner, registry, path.failpoint(Hook::OutboundRequestBody))
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T, B> RoundTripper<B> for HijackedRoundTripper<T>
where
    T: RoundTripper<HijackedBody<B>>,
    B: Body + Unpin + Send + 'static,
{
    type ResponseBody = T::ResponseBody;

    async fn round_trip(
        &self,
        request: Request<B>,
    ) -> Result<Response<Self::ResponseBody>, TransportError> {
        let request = hijack_request(request, self.registry.clone(), self.failpoint.clone());
        self.inner.round_trip(request).await
    }
}
