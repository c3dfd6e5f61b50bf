//! Named transport hooks.
//!
//! Peer traffic travels on two paths: the *pipeline* path sends one message
//! per request, the *stream* path keeps a long-lived connection open for
//! many messages. Each path exposes the same set of hooks, so a test can
//! drop data on one path while the other keeps working.
//!
//! ```
//! use faultline_failpoint::{Hook, TransportPath};
//!
//! assert_eq!(
//!     TransportPath::Stream.failpoint(Hook::ResponseBody),
//!     "stream.inbound.response_body"
//! );
//! ```

use std::fmt;

/// Which peer transport path a hook belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportPath {
    /// One message per request.
    Pipeline,
    /// Long-lived message stream.
    Stream,
}

/// Where on a transport path data is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Body of a request this member sends.
    OutboundRequestBody,
    /// Body of a request this member receives.
    InboundRequestBody,
    /// Status line and headers of a response this member sends.
    ResponseHeader,
    /// Body of a response this member sends.
    ResponseBody,
}

impl Hook {
    /// Every hook, in transport order.
    pub const ALL: [Hook; 4] = [
        Hook::OutboundRequestBody,
        Hook::InboundRequestBody,
        Hook::ResponseHeader,
        Hook::ResponseBody,
    ];
}

impl TransportPath {
    /// Both paths.
    pub const ALL: [TransportPath; 2] = [TransportPath::Pipeline, TransportPath::Stream];

    /// Failpoint name for `hook` on this path.
    pub const fn failpoint(self, hook: Hook) -> &'static str {
        match (self, hook) {
            (TransportPath::Pipeline, Hook::OutboundRequestBody) => {
                "pipeline.outbound.request_body"
            }
            (TransportPath::Pipeline, Hook::InboundRequestBody) => "pipeline.inbound.request_body",
            (TransportPath::Pipeline, Hook::ResponseHeader) => "pipeline.inbound.response_header",
            (TransportPath::Pipeline, Hook::ResponseBody) => "pipeline.inbound.response_body",
            (TransportPath::Stream, Hook::OutboundRequestBody) => "stream.outbound.request_body",
            (TransportPath::Stream, Hook::InboundRequestBody) => "stream.inbound.request_body",
            (TransportPath::Stream, Hook::ResponseHeader) => "stream.inbound.response_header",
            (TransportPath::Stream, Hook::ResponseBody) => "stream.inbound.response_body",
        }
    }
}

impl fmt::Display for TransportPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportPath::Pipeline => f.write_str("pipeline"),
            TransportPath::Stream => f.write_str("stream"),
        }
    }
}
