//! # faultline-failpoint
//!
//! Named, runtime-armable failpoints and the hijacked transport streams that
//! consult them.
//!
//! The wrappers sit at the peer-transport boundary and let production code
//! run unmodified while a test silently destroys data at three points:
//!
//! | Wrapper | Wraps | Armed behavior |
//! |---------|-------|----------------|
//! | [`HijackedRoundTripper`] | outbound transport | request body replaced by a [`HijackedBody`] |
//! | [`HijackedReader`] / [`HijackedBody`] | inbound request body | underlying bytes drained, nothing delivered |
//! | [`HijackedResponseWriter`] | inbound response writer | header and body writes report success, nothing written |
//!
//! The connection is never closed by a wrapper: this simulates data loss on
//! a live connection, which exercises retry and resend paths differently
//! than a partition does.
//!
//! ## Failpoints
//!
//! A [`FailpointRegistry`] is created once and shared by `Arc` with every
//! wrapper. Failpoints default to disarmed. Actions are parsed once when
//! armed:
//!
//! ```
//! use faultline_failpoint::{FailpointAction, FailpointRegistry};
//! use std::time::Duration;
//!
//! let registry = FailpointRegistry::new();
//! registry.arm_str("stream.inbound.response_body", "sleep(100ms)").unwrap();
//! assert_eq!(
//!     registry.evaluate("stream.inbound.response_body"),
//!     Some(FailpointAction::Sleep(Duration::from_millis(100)))
//! );
//! registry.disarm("stream.inbound.response_body");
//! assert!(!registry.is_armed("stream.inbound.response_body"));
//! ```
//!
//! ## Transport paths
//!
//! Hooks exist on both the single-message pipeline path and the persistent
//! stream path, see [`hooks`].

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod action;
mod body;
mod error;
mod gate;
pub mod hooks;
mod reader;
mod registry;
mod round_tripper;
mod underlying;
mod writer;

pub use action::FailpointAction;
pub use body::{HijackedBody, hijack_request};
pub use error::{FailpointError, FailpointResult, TransportError};
pub use hooks::{Hook, TransportPath};
pub use reader::HijackedReader;
pub use registry::FailpointRegistry;
pub use round_tripper::{HijackedRoundTripper, Http1Transport, RoundTripper};
pub use underlying::Underlying;
pub use writer::{
    ChannelResponseWriter, HijackedResponseWriter, PendingResponse, ResponseBody, ResponseWriter,
};
