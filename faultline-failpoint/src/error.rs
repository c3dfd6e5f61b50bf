//! Error types for failpoints and hijacked transports.

use thiserror::Error;

/// Errors raised while configuring failpoints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailpointError {
    /// The action string could not be parsed.
    #[error("invalid failpoint action {spec:?}: {reason}")]
    InvalidAction {
        /// The rejected action string.
        spec: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Result type for failpoint configuration.
pub type FailpointResult<T> = Result<T, FailpointError>;

/// Errors returned by [`RoundTripper`](crate::RoundTripper) implementations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The HTTP layer failed.
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// The transport was shut down.
    #[error("transport closed")]
    Closed,
}
