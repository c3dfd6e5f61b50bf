//! Normalized watch history kept in diagnostic reports.
//!
//! Raw watch responses are converted into this model as they are received.
//! Large values are replaced by their hash so reports stay small.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::{EventKind, KeyValue, RawEvent, RawWatchResponse, Revision, WatchRequest};

/// Values of this length or longer are stored as a hash.
pub const VALUE_HASH_THRESHOLD: usize = 20;

/// Kind of operation an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    /// Key was written.
    Put,
    /// Key was removed.
    Delete,
}

impl From<EventKind> for OperationType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Put => OperationType::Put,
            EventKind::Delete => OperationType::Delete,
        }
    }
}

/// A value, or the CRC32 of it for large values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueOrHash {
    /// Value kept verbatim.
    Value(String),
    /// CRC32 of a value at least [`VALUE_HASH_THRESHOLD`] bytes long.
    Hash(u32),
}

impl ValueOrHash {
    /// Normalize raw value bytes.
    ///
    /// ```
    /// use faultline_core::ValueOrHash;
    ///
    /// assert_eq!(ValueOrHash::from_bytes(b"value"), ValueOrHash::Value("value".into()));
    /// assert!(matches!(ValueOrHash::from_bytes(&[b'x'; 64]), ValueOrHash::Hash(_)));
    /// ```
    pub fn from_bytes(value: &[u8]) -> Self {
        if value.len() < VALUE_HASH_THRESHOLD {
            ValueOrHash::Value(String::from_utf8_lossy(value).into_owned())
        } else {
            ValueOrHash::Hash(crc32fast::hash(value))
        }
    }
}

/// A mutation in the normalized model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Operation kind.
    pub op: OperationType,
    /// Key as a string.
    pub key: String,
    /// Value written. Empty for deletions.
    pub value: ValueOrHash,
}

/// A mutation together with the revision it was committed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEvent {
    /// The mutation.
    pub event: Event,
    /// Commit revision.
    pub revision: Revision,
    /// Whether this put created the key.
    pub is_create: bool,
}

/// Previous value of a key, delivered with `prev_kv` watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRevision {
    /// Previous value.
    pub value: ValueOrHash,
    /// Revision of the previous modification.
    pub mod_revision: Revision,
    /// Version of the previous value.
    pub version: i64,
}

/// One event of a recorded watch response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// The persisted mutation.
    pub persisted: PersistedEvent,
    /// Previous value, when requested and known.
    pub prev_value: Option<ValueRevision>,
}

impl WatchEvent {
    /// Convert a raw event into the normalized model.
    pub fn from_raw(raw: &RawEvent) -> Self {
        let is_create = raw.kind == EventKind::Put && raw.kv.create_revision == raw.kv.mod_revision;
        Self {
            persisted: PersistedEvent {
                event: Event {
                    op: raw.kind.into(),
                    key: String::from_utf8_lossy(&raw.kv.key).into_owned(),
                    value: ValueOrHash::from_bytes(&raw.kv.value),
                },
                revision: raw.kv.mod_revision,
                is_create,
            },
            prev_value: raw.prev_kv.as_ref().map(value_revision),
        }
    }
}

fn value_revision(kv: &KeyValue) -> ValueRevision {
    ValueRevision {
        value: ValueOrHash::from_bytes(&kv.value),
        mod_revision: kv.mod_revision,
        version: kv.version,
    }
}

/// A recorded watch response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchResponse {
    /// Events of the response.
    pub events: Vec<WatchEvent>,
    /// Set for responses with no events, no error and no cancellation.
    pub is_progress_notify: bool,
    /// Header revision of the response.
    pub revision: Revision,
    /// Time the response was received, relative to the recording base time.
    pub time: Duration,
    /// Error carried by the response, if any.
    pub error: Option<String>,
}

impl WatchResponse {
    /// Convert a raw response, stamping it relative to `base_time`.
    pub fn from_raw(raw: &RawWatchResponse, base_time: Instant) -> Self {
        Self {
            events: raw.events.iter().map(WatchEvent::from_raw).collect(),
            is_progress_notify: raw.events.is_empty() && !raw.canceled && raw.error.is_none(),
            revision: raw.header_revision,
            time: base_time.elapsed(),
            error: raw.error.clone(),
        }
    }
}

/// A watch subscription and every response it delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOperation {
    /// The subscription request.
    pub request: WatchRequest,
    /// Responses in delivery order.
    pub responses: Vec<WatchResponse>,
}

impl WatchOperation {
    /// Start recording a subscription.
    pub fn new(request: WatchRequest) -> Self {
        Self {
            request,
            responses: Vec::new(),
        }
    }

    /// Record one raw response.
    pub fn record(&mut self, raw: &RawWatchResponse, base_time: Instant) {
        self.responses.push(WatchResponse::from_raw(raw, base_time));
    }

    /// Total number of events recorded on this subscription.
    pub fn event_count(&self) -> usize {
        self.responses.iter().map(|r| r.events.len()).sum()
    }
}
