//! Error types for the verifier and the completeness checker.

use std::fmt;

use faultline_core::{ClientError, Revision};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad classification of a [`CheckError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A store call failed or returned data that cannot be compared.
    RpcFailure,
    /// Members disagree about the keyspace.
    ConsistencyViolation,
    /// A watcher did not observe every required revision.
    CompletenessViolation,
}

/// Hash query field that two members disagreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashField {
    /// Revision the hash was computed at.
    HashRevision,
    /// Compaction boundary at hash time.
    CompactRevision,
    /// The keyspace hash.
    Hash,
}

impl fmt::Display for HashField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashField::HashRevision => f.write_str("hash_revision"),
            HashField::CompactRevision => f.write_str("compact_revision"),
            HashField::Hash => f.write_str("hash"),
        }
    }
}

/// Errors reported by the checkers.
///
/// Every variant names the member (or members) involved. A detected
/// violation is always returned as a value, never raised as a panic.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckError {
    /// A store call failed after retries were exhausted.
    #[error("rpc to {member} failed: {source}")]
    Rpc {
        /// Member that was called.
        member: String,
        /// Client failure.
        source: ClientError,
    },

    /// A query answered for a different revision than requested.
    #[error("{member} answered at header revision {header}, requested {requested}")]
    RevisionMismatch {
        /// Member that answered.
        member: String,
        /// Revision that was requested.
        requested: Revision,
        /// Revision the member answered at.
        header: Revision,
    },

    /// A watch subscription failed in a way that cannot be resumed.
    #[error("watch on {member} failed: {reason}")]
    WatchFailed {
        /// Member being watched.
        member: String,
        /// What went wrong.
        reason: String,
    },

    /// Nothing to check.
    #[error("no members to check")]
    NoMembers,

    /// Two adjacent members disagree on a hash query field.
    #[error("{field} mismatch between {left} ({left_value}) and {right} ({right_value})")]
    Consistency {
        /// Field that differs.
        field: HashField,
        /// Member enumerated first.
        left: String,
        /// Member enumerated second.
        right: String,
        /// Value reported by `left`.
        left_value: i64,
        /// Value reported by `right`.
        right_value: i64,
    },

    /// A watcher stopped before observing a required revision.
    #[error("{member} observed up to revision {observed}, required {required}")]
    Completeness {
        /// Member being watched.
        member: String,
        /// Highest revision that had to be observed.
        required: Revision,
        /// Highest revision actually observed.
        observed: Revision,
    },
}

impl CheckError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckError::Rpc { .. }
            | CheckError::RevisionMismatch { .. }
            | CheckError::WatchFailed { .. }
            | CheckError::NoMembers => ErrorKind::RpcFailure,
            CheckError::Consistency { .. } => ErrorKind::ConsistencyViolation,
            CheckError::Completeness { .. } => ErrorKind::CompletenessViolation,
        }
    }

    /// The member this error is about, when there is a single one.
    ///
    /// For a consistency mismatch this is the second member of the pair,
    /// the first one found to disagree with its predecessor.
    pub fn member(&self) -> Option<&str> {
        match self {
            CheckError::Rpc { member, .. }
            | CheckError::RevisionMismatch { member, .. }
            | CheckError::WatchFailed { member, .. }
            | CheckError::Completeness { member, .. } => Some(member),
            CheckError::Consistency { right, .. } => Some(right),
            CheckError::NoMembers => None,
        }
    }
}

/// Result type for checker operations.
pub type CheckResult<T> = Result<T, CheckError>;
