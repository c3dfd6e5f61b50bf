//! Store client abstraction for hash queries and watch subscriptions.
//!
//! The checkers never talk to a store directly. They go through these two
//! traits, which lets the same checking code run against a real client or
//! against a synthetic in-memory cluster.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{HashKvResponse, MemberEndpoint, RawWatchResponse, Revision, WatchRequest};

/// Stream of responses for one watch subscription.
///
/// The stream ending (`None`) without a preceding error or cancellation
/// response means the server reset the subscription.
pub type WatchStream = BoxStream<'static, RawWatchResponse>;

/// Errors returned by store client calls.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ClientError {
    /// The member could not be reached (dial failure, connection refused).
    #[error("member {0} unavailable")]
    Unavailable(String),

    /// The call did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The requested revision is below the compaction boundary.
    #[error("required revision {requested} has been compacted (compact revision {compact_revision})")]
    Compacted {
        /// Revision that was asked for.
        requested: Revision,
        /// Current compaction boundary.
        compact_revision: Revision,
    },

    /// The requested revision is ahead of the member.
    #[error("required revision {requested} is a future revision (current {current})")]
    FutureRevision {
        /// Revision that was asked for.
        requested: Revision,
        /// Member's current revision.
        current: Revision,
    },

    /// Any other transport or server failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Unavailable(_) | ClientError::Timeout)
    }
}

/// Result type for store client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Issues HashKV queries against a single member.
#[async_trait]
pub trait HashKvClient: Send + Sync {
    /// Hash the member's keyspace as of `revision` (`0` = latest).
    async fn hash_kv(
        &self,
        endpoint: &MemberEndpoint,
        revision: Revision,
    ) -> ClientResult<HashKvResponse>;
}

/// Opens watch subscriptions against a single member.
#[async_trait]
pub trait WatchClient: Send + Sync {
    /// Open a subscription described by `request`.
    ///
    /// Errors are returned for failures to establish the subscription. Once
    /// established, failures are reported in-band on the stream.
    async fn watch(
        &self,
        endpoint: &MemberEndpoint,
        request: WatchRequest,
    ) -> ClientResult<WatchStream>;
}

#[async_trait]
impl<T> HashKvClient for Arc<T>
where
    T: HashKvClient + ?Sized,
{
    async fn hash_kv(
        &self,
        endpoint: &MemberEndpoint,
        revision: Revision,
    ) -> ClientResult<HashKvResponse> {
        (**self).hash_kv(endpoint, revision).await
    }
}

#[async_trait]
impl<T> WatchClient for Arc<T>
where
    T: WatchClient + ?Sized,
{
    async fn watch(
        &self,
        endpoint: &MemberEndpoint,
        request: WatchRequest,
    ) -> ClientResult<WatchStream> {
        (**self).watch(endpoint, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClientError::Unavailable("m1".into()).is_transient());
        assert!(ClientError::Timeout.is_transient());
        assert!(
            !ClientError::Compacted {
                requested: 3,
                compact_revision: 5
            }
            .is_transient()
        );
        assert!(!ClientError::Transport("reset".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::FutureRevision {
            requested: 30,
            current: 21,
        };
        assert_eq!(
            err.to_string(),
            "required revision 30 is a future revision (current 21)"
        );
    }
}
