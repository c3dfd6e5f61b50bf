//! Hijacked HTTP request bodies.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use hyper::Request;
use hyper::body::{Body, Frame, SizeHint};

use crate::gate::{Decision, Gate};
use crate::registry::FailpointRegistry;
use crate::underlying::Underlying;

/// A [`Body`] whose data frames vanish while a failpoint is
/// armed.
///
/// Each frame is one read: the failpoint is consulted, the frame is pulled
/// from the source, and when armed it is discarded. Trailers and errors
/// always pass through. The size hint is left unknown since any frame may
/// be dropped.
#[derive(Debug)]
pub struct HijackedBody<B> {
    inner: Underlying<B>,
    gate: Gate,
}

impl<B> HijackedBody<B>
where
    B: Body + Unpin,
{
    /// Wrap `inner`, consulting `failpoint` before each frame.
    pub fn new(inner: B, registry: Arc<FailpointRegistry>, failpoint: impl Into<String>) -> Self {
        Self {
            inner: Underlying::Attached(inner),
            gate: Gate::new(registry, failpoint.into()),
        }
    }

    /// A body with no source. It ends immediately.
    pub fn detached(registry: Arc<FailpointRegistry>, failpoint: impl Into<String>) -> Self {
        Self {
            inner: Underlying::Detached,
            gate: Gate::new(registry, failpoint.into()),
        }
    }

    /// Release the source. A no-op when already detached.
    pub fn close(&mut self) {
        self.inner.take();
    }

    /// Unwrap the source, if any.
    pub fn into_inner(self) -> Option<B> {
        self.inner.into_inner()
    }
}

impl<B> Body for HijackedBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };

            let decision = ready!(this.gate.poll_decide(cx));
            let frame = ready!(Pin::new(inner).poll_frame(cx));
            this.gate.reset();

            match frame {
                Some(Ok(frame)) if decision == Decision::Drop && frame.is_data() => {
                    tracing::debug!(failpoint = %this.gate.name(), "dropped body frame");
                }
                other => return Poll::Ready(other),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.as_ref().map(Body::is_end_stream).unwrap_or(true)
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

/// Replace the body of an inbound request with a [`HijackedBody`].
pub fn hijack_request<B>(
    request: Request<B>,
    registry: Arc<FailpointRegistry>,
    failpoint: impl Into<String>,
) -> Request<HijackedBody<B>>
where
    B: Body + Unpin,
{
    let failpoint = failpoint.into();
    request.map(|body| HijackedBody::new(body, registry, failpoint))
}
