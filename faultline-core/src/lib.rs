//! # faultline-core
//!
//! Core abstractions for the faultline verification harness.
//!
//! This crate provides the types and collaborator traits the checkers are
//! written against, so the same checking code runs against a real store
//! client or against the in-memory cluster shipped with `faultline::sim`:
//!
//! - **Collaborator traits**: [`HashKvClient`] and [`WatchClient`], the two
//!   store RPCs the checkers depend on
//! - **Wire types**: [`HashKvResponse`], [`KeyValue`], [`RawEvent`],
//!   [`RawWatchResponse`] as the store client hands them over
//! - **Recording model**: [`WatchOperation`], [`WatchResponse`] and
//!   [`WatchEvent`], the normalized form kept in diagnostic reports
//!
//! ## Revisions
//!
//! A [`Revision`] is the store's logical timestamp. Revision `0` is reserved
//! and means "latest" in requests.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod client;
mod model;
mod types;

// Client exports
pub use client::{ClientError, ClientResult, HashKvClient, WatchClient, WatchStream};

// Recording model exports
pub use model::{
    Event, OperationType, PersistedEvent, VALUE_HASH_THRESHOLD, ValueOrHash, ValueRevision,
    WatchEvent, WatchOperation, WatchResponse,
};

// Core type exports
pub use types::{
    EventKind, HashKvResponse, KeyValue, MemberEndpoint, RawEvent, RawWatchResponse, Revision,
    WatchRequest,
};
