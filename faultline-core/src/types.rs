//! Core types exchanged with the store client.
//!
//! These mirror what a key-value store client returns on the wire. They are
//! plain data: checkers read them, the recording model normalizes them.

use serde::{Deserialize, Serialize};

/// Logical timestamp assigned to each committed mutation.
///
/// Revisions are strictly increasing per cluster. `0` is used in requests
/// to mean "the latest revision".
pub type Revision = i64;

/// A cluster member as addressed by the harness.
///
/// # Examples
///
/// ```
/// use faultline_core::MemberEndpoint;
///
/// let member = MemberEndpoint::new("member-1", "127.0.0.1:2379");
/// assert_eq!(member.to_string(), "member-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberEndpoint {
    /// Human readable member name, used in reports and errors.
    pub name: String,
    /// Client address of the member.
    pub address: String,
}

impl MemberEndpoint {
    /// Create a new member endpoint.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl std::fmt::Display for MemberEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Response of a single HashKV query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashKvResponse {
    /// Hash over the keyspace as of `hash_revision`.
    pub hash: u32,
    /// Revision the hash was computed at.
    pub hash_revision: Revision,
    /// The member's compaction boundary when the hash was computed.
    pub compact_revision: Revision,
    /// The member's current revision (response header).
    pub header_revision: Revision,
}

/// A stored key-value pair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyValue {
    /// Key bytes.
    pub key: Vec<u8>,
    /// Value bytes. Empty for deletions.
    pub value: Vec<u8>,
    /// Revision the key was created at, `0` when unknown.
    pub create_revision: Revision,
    /// Revision of the last modification.
    pub mod_revision: Revision,
    /// Number of modifications since creation.
    pub version: i64,
}

/// Kind of a mutation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Key was written.
    Put,
    /// Key was removed.
    Delete,
}

/// A mutation event as delivered by a watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event kind.
    pub kind: EventKind,
    /// The key-value after the mutation.
    pub kv: KeyValue,
    /// The key-value before the mutation, when requested with `prev_kv`.
    pub prev_kv: Option<KeyValue>,
}

impl RawEvent {
    /// Revision this event was committed at.
    pub fn revision(&self) -> Revision {
        self.kv.mod_revision
    }
}

/// One response on a watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawWatchResponse {
    /// Member revision when the response was produced.
    pub header_revision: Revision,
    /// Events in this batch, ordered by revision.
    pub events: Vec<RawEvent>,
    /// Set when the server canceled the watch.
    pub canceled: bool,
    /// Compaction boundary reported with a cancellation, `0` otherwise.
    pub compact_revision: Revision,
    /// Application-visible error carried by the response.
    pub error: Option<String>,
}

impl RawWatchResponse {
    /// Revision of the last event in the batch.
    pub fn last_revision(&self) -> Option<Revision> {
        self.events.last().map(RawEvent::revision)
    }

    /// Whether this response is a cancellation caused by compaction.
    pub fn is_compaction_cancel(&self) -> bool {
        self.canceled && self.compact_revision > 0
    }
}

/// Parameters of a watch subscription.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WatchRequest {
    /// Key prefix to watch. Empty watches the whole keyspace.
    pub key: String,
    /// First revision to deliver.
    pub revision: Revision,
    /// Include the previous key-value in events.
    pub with_prev_kv: bool,
    /// Ask the server for periodic progress notifications.
    pub with_progress_notify: bool,
}

impl WatchRequest {
    /// Watch `key` as a prefix starting at `revision`.
    pub fn prefix(key: impl Into<String>, revision: Revision) -> Self {
        Self {
            key: key.into(),
            revision,
            with_prev_kv: false,
            with_progress_notify: false,
        }
    }

    /// Include previous key-values in delivered events.
    pub fn with_prev_kv(mut self, enabled: bool) -> Self {
        self.with_prev_kv = enabled;
        self
    }

    /// Request progress notifications.
    pub fn with_progress_notify(mut self, enabled: bool) -> Self {
        self.with_progress_notify = enabled;
        self
    }
}
