//! In-memory replicated store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use faultline_core::{
    ClientError, ClientResult, EventKind, HashKvClient, HashKvResponse, KeyValue, MemberEndpoint,
    RawEvent, Revision, WatchClient, WatchRequest, WatchStream,
};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::watch;

use crate::error::HashField;
use crate::sim::stream::watch_stream;

/// Largest batch a seeded cluster delivers in one watch response.
const SEEDED_MAX_BATCH: usize = 4;

/// Stream fault pending on one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingCancel {
    pub(crate) after_revision: Revision,
    pub(crate) compact_revision: Revision,
}

#[derive(Debug)]
pub(crate) struct MemberState {
    pub(crate) endpoint: MemberEndpoint,
    /// Prefix of the cluster history this member has applied.
    pub(crate) applied: Revision,
    pub(crate) lagging: bool,
    pub(crate) unavailable: bool,
    pub(crate) hash_divergence: Option<HashField>,
    pub(crate) pending_cancel: Option<PendingCancel>,
    pub(crate) reset_every: Option<usize>,
    pub(crate) pending_error: Option<String>,
    pub(crate) head: watch::Sender<Revision>,
}

impl MemberState {
    fn apply_to(&mut self, revision: Revision) {
        if revision > self.applied {
            self.applied = revision;
            self.head.send_replace(revision);
        }
    }
}

#[derive(Debug)]
pub(crate) struct ClusterState {
    /// Committed events, `history[i]` carries revision `i + 1`.
    pub(crate) history: Vec<RawEvent>,
    /// Live keys at the head of `history`.
    current: BTreeMap<Vec<u8>, KeyValue>,
    pub(crate) compact_revision: Revision,
    pub(crate) members: Vec<MemberState>,
    pub(crate) rng: Option<ChaCha8Rng>,
}

impl ClusterState {
    pub(crate) fn head(&self) -> Revision {
        self.history.len() as Revision
    }

    /// Number of events to put in the next watch response.
    pub(crate) fn batch_size(&mut self, available: usize) -> usize {
        use rand::Rng;
        match self.rng.as_mut() {
            Some(rng) => rng.random_range(1..=SEEDED_MAX_BATCH).min(available),
            None => available,
        }
    }

    fn commit(&mut self, kind: EventKind, key: &[u8], value: &[u8], only: Option<&[usize]>) -> Revision {
        let revision = self.head() + 1;
        let prev_kv = self.current.get(key).cloned();
        let kv = match kind {
            EventKind::Put => {
                let (create_revision, version) = prev_kv
                    .as_ref()
                    .map_or((revision, 1), |prev| (prev.create_revision, prev.version + 1));
                let kv = KeyValue {
                    key: key.to_vec(),
                    value: value.to_vec(),
                    create_revision,
                    mod_revision: revision,
                    version,
                };
                self.current.insert(key.to_vec(), kv.clone());
                kv
            }
            EventKind::Delete => {
                self.current.remove(key);
                KeyValue {
                    key: key.to_vec(),
                    mod_revision: revision,
                    ..KeyValue::default()
                }
            }
        };
        self.history.push(RawEvent { kind, kv, prev_kv });

        for (index, member) in self.members.iter_mut().enumerate() {
            let selected = match only {
                Some(only) => only.contains(&index),
                None => !member.lagging,
            };
            // A member only ever applies a prefix of the history.
            if selected && member.applied == revision - 1 {
                member.apply_to(revision);
            }
        }
        revision
    }

    fn member(&self, endpoint: &MemberEndpoint) -> ClientResult<(usize, &MemberState)> {
        self.members
            .iter()
            .enumerate()
            .find(|(_, m)| m.endpoint.name == endpoint.name)
            .ok_or_else(|| ClientError::Transport(format!("unknown member {}", endpoint.name)))
    }

    /// CRC32 over the live keyspace as of `revision`.
    fn keyspace_hash(&self, revision: Revision) -> u32 {
        let mut keyspace: BTreeMap<&[u8], &KeyValue> = BTreeMap::new();
        for event in self.history.iter().take(revision.max(0) as usize) {
            match event.kind {
                EventKind::Put => {
                    keyspace.insert(event.kv.key.as_slice(), &event.kv);
                }
                EventKind::Delete => {
                    keyspace.remove(event.kv.key.as_slice());
                }
            }
        }

        let mut hasher = crc32fast::Hasher::new();
        for (key, kv) in keyspace {
            hasher.update(key);
            hasher.update(&kv.value);
            hasher.update(&kv.mod_revision.to_be_bytes());
        }
        hasher.finalize()
    }
}

/// An in-memory N-member key-value store.
///
/// Every member applies a prefix of one shared history, so members agree
/// unless a test makes them lag or injects a fault. Implements both
/// [`HashKvClient`] and [`WatchClient`], and is cheap to share behind an
/// `Arc`.
///
/// Revisions start at `1` with the first write.
#[derive(Debug, Clone)]
pub struct SimCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl SimCluster {
    /// Cluster of `members` members named `m1`, `m2`, ...
    ///
    /// Watch responses carry every event available.
    pub fn new(members: usize) -> Self {
        Self::build(members, None)
    }

    /// Like [`new`](Self::new), with watch batch sizes drawn from a
    /// generator seeded with `seed`.
    pub fn with_seed(members: usize, seed: u64) -> Self {
        Self::build(members, Some(ChaCha8Rng::seed_from_u64(seed)))
    }

    fn build(members: usize, rng: Option<ChaCha8Rng>) -> Self {
        let members = (1..=members)
            .map(|i| MemberState {
                endpoint: MemberEndpoint::new(format!("m{i}"), format!("127.0.0.1:{}", 2379 + 10 * i)),
                applied: 0,
                lagging: false,
                unavailable: false,
                hash_divergence: None,
                pending_cancel: None,
                reset_every: None,
                pending_error: None,
                head: watch::Sender::new(0),
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                history: Vec::new(),
                current: BTreeMap::new(),
                compact_revision: 0,
                members,
                rng,
            })),
        }
    }

    pub(crate) fn state(&self) -> &Arc<Mutex<ClusterState>> {
        &self.state
    }

    /// Endpoints of every member, in member order.
    pub fn members(&self) -> Vec<MemberEndpoint> {
        self.state
            .lock()
            .members
            .iter()
            .map(|m| m.endpoint.clone())
            .collect()
    }

    /// Latest committed revision.
    pub fn head(&self) -> Revision {
        self.state.lock().head()
    }

    /// Revision `member` has applied.
    pub fn applied(&self, member: usize) -> Revision {
        self.state
            .lock()
            .members
            .get(member)
            .map_or(0, |m| m.applied)
    }

    /// Write `key` on every member that is not lagging.
    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Revision {
        self.state
            .lock()
            .commit(EventKind::Put, key.as_ref(), value.as_ref(), None)
    }

    /// Write `key`, applying it only on `members`. The others fall behind
    /// until [`catch_up`](Self::catch_up).
    pub fn put_on(&self, members: &[usize], key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Revision {
        self.state
            .lock()
            .commit(EventKind::Put, key.as_ref(), value.as_ref(), Some(members))
    }

    /// Delete `key`. Returns `None` without a new revision when it does not
    /// exist.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Option<Revision> {
        let mut state = self.state.lock();
        if !state.current.contains_key(key.as_ref()) {
            return None;
        }
        Some(state.commit(EventKind::Delete, key.as_ref(), &[], None))
    }

    /// Stop (or resume) applying writes on `member`. Resuming catches up.
    pub fn lag(&self, member: usize, lagging: bool) {
        let mut state = self.state.lock();
        let head = state.head();
        if let Some(m) = state.members.get_mut(member) {
            m.lagging = lagging;
            if !lagging {
                m.apply_to(head);
            }
        }
    }

    /// Apply every committed write on `member`.
    pub fn catch_up(&self, member: usize) {
        let mut state = self.state.lock();
        let head = state.head();
        if let Some(m) = state.members.get_mut(member) {
            m.apply_to(head);
        }
    }

    /// Advance the compaction boundary to `revision`, capped at the head.
    pub fn compact(&self, revision: Revision) {
        let mut state = self.state.lock();
        let revision = revision.min(state.head());
        if revision > state.compact_revision {
            state.compact_revision = revision;
            tracing::debug!(revision, "compacted");
        }
    }

    /// Make `member` report a different value for `field` in hash queries.
    pub fn inject_hash_divergence(&self, member: usize, field: HashField) {
        if let Some(m) = self.state.lock().members.get_mut(member) {
            m.hash_divergence = Some(field);
        }
    }

    /// Cancel `member`'s next subscription once it has delivered
    /// `after_revision`, reporting `compact_revision`. Fires once.
    pub fn inject_watch_cancel(&self, member: usize, after_revision: Revision, compact_revision: Revision) {
        if let Some(m) = self.state.lock().members.get_mut(member) {
            m.pending_cancel = Some(PendingCancel {
                after_revision,
                compact_revision,
            });
        }
    }

    /// End every subscription on `member` after `batches` responses, as a
    /// server-side stream reset would. `0` disables.
    pub fn set_reset_every(&self, member: usize, batches: usize) {
        if let Some(m) = self.state.lock().members.get_mut(member) {
            m.reset_every = (batches > 0).then_some(batches);
        }
    }

    /// Refuse (or accept again) connections to `member`.
    pub fn set_unavailable(&self, member: usize, unavailable: bool) {
        if let Some(m) = self.state.lock().members.get_mut(member) {
            m.unavailable = unavailable;
        }
    }

    /// Fail `member`'s next subscription with `error`. Fires once.
    pub fn inject_watch_error(&self, member: usize, error: impl Into<String>) {
        if let Some(m) = self.state.lock().members.get_mut(member) {
            m.pending_error = Some(error.into());
        }
    }
}

#[async_trait]
impl HashKvClient for SimCluster {
    async fn hash_kv(
        &self,
        endpoint: &MemberEndpoint,
        revision: Revision,
    ) -> ClientResult<HashKvResponse> {
        let state = self.state.lock();
        let (_, member) = state.member(endpoint)?;
        if member.unavailable {
            return Err(ClientError::Unavailable(endpoint.name.clone()));
        }

        let head = member.applied;
        let revision = if revision == 0 { head } else { revision };
        if revision > head {
            return Err(ClientError::FutureRevision {
                requested: revision,
                current: head,
            });
        }
        if revision < state.compact_revision {
            return Err(ClientError::Compacted {
                requested: revision,
                compact_revision: state.compact_revision,
            });
        }

        let mut response = HashKvResponse {
            hash: state.keyspace_hash(revision),
            hash_revision: revision,
            compact_revision: state.compact_revision,
            header_revision: head,
        };
        match member.hash_divergence {
            Some(HashField::Hash) => response.hash = !response.hash,
            Some(HashField::HashRevision) => response.hash_revision += 1,
            Some(HashField::CompactRevision) => response.compact_revision += 1,
            None => {}
        }
        Ok(response)
    }
}

#[async_trait]
impl WatchClient for SimCluster {
    async fn watch(
        &self,
        endpoint: &MemberEndpoint,
        request: WatchRequest,
    ) -> ClientResult<WatchStream> {
        let mut state = self.state.lock();
        let (index, member) = state.member(endpoint)?;
        if member.unavailable {
            return Err(ClientError::Unavailable(endpoint.name.clone()));
        }
        let head = member.head.subscribe();
        let error = state.members[index].pending_error.take();
        let cancel = state.members[index].pending_cancel.take();
        let reset_every = state.members[index].reset_every;
        tracing::trace!(member = %endpoint, revision = request.revision, "watch opened");
        drop(state);

        Ok(watch_stream(
            self.state.clone(),
            request,
            head,
            error,
            cancel,
            reset_every,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revisions_and_versions() {
        let cluster = SimCluster::new(3);
        assert_eq!(cluster.put("a", "1"), 1);
        assert_eq!(cluster.put("a", "2"), 2);
        assert_eq!(cluster.delete("a"), Some(3));
        assert_eq!(cluster.delete("a"), None);
        assert_eq!(cluster.head(), 3);

        let state = cluster.state().lock();
        let second = &state.history[1];
        assert_eq!(second.kv.version, 2);
        assert_eq!(second.kv.create_revision, 1);
        assert_eq!(second.prev_kv.as_ref().map(|kv| kv.value.clone()), Some(b"1".to_vec()));
        assert_eq!(state.history[2].kind, EventKind::Delete);
    }

    #[test]
    fn test_lagging_member_catches_up() {
        let cluster = SimCluster::new(2);
        cluster.lag(1, true);
        cluster.put("a", "1");
        cluster.put("b", "1");
        assert_eq!(cluster.applied(0), 2);
        assert_eq!(cluster.applied(1), 0);

        cluster.lag(1, false);
        assert_eq!(cluster.applied(1), 2);
    }

    #[test]
    fn test_put_on_leaves_others_behind() {
        let cluster = SimCluster::new(3);
        cluster.put_on(&[0], "a", "1");
        assert_eq!(cluster.applied(0), 1);
        assert_eq!(cluster.applied(1), 0);

        // Members behind the head do not apply later writes out of order.
        cluster.put("b", "1");
        assert_eq!(cluster.applied(0), 2);
        assert_eq!(cluster.applied(1), 0);

        cluster.catch_up(1);
        assert_eq!(cluster.applied(1), 2);
    }

    #[tokio::test]
    async fn test_hash_kv_agrees_across_members() {
        let cluster = SimCluster::new(3);
        for i in 0..10 {
            cluster.put(format!("k{i}"), format!("v{i}"));
        }
        let members = cluster.members();
        let first = cluster.hash_kv(&members[0], 10).await.expect("hash");
        for member in &members[1..] {
            assert_eq!(cluster.hash_kv(member, 10).await.expect("hash"), first);
        }

        let earlier = cluster.hash_kv(&members[0], 5).await.expect("hash");
        assert_ne!(earlier.hash, first.hash);
        assert_eq!(earlier.header_revision, 10);
    }

    #[tokio::test]
    async fn test_hash_kv_rejects_future_and_compacted() {
        let cluster = SimCluster::new(1);
        for i in 0..5 {
            cluster.put("k", format!("v{i}"));
        }
        cluster.compact(3);
        let member = &cluster.members()[0];

        assert!(matches!(
            cluster.hash_kv(member, 9).await,
            Err(ClientError::FutureRevision { requested: 9, current: 5 })
        ));
        assert!(matches!(
            cluster.hash_kv(member, 2).await,
            Err(ClientError::Compacted { requested: 2, compact_revision: 3 })
        ));
        let latest = cluster.hash_kv(member, 0).await.expect("hash");
        assert_eq!(latest.hash_revision, 5);
        assert_eq!(latest.compact_revision, 3);
    }

    #[tokio::test]
    async fn test_unavailable_member_refuses_calls() {
        let cluster = SimCluster::new(2);
        cluster.set_unavailable(1, true);
        let member = &cluster.members()[1];
        assert_eq!(
            cluster.hash_kv(member, 0).await,
            Err(ClientError::Unavailable("m2".into()))
        );
        assert!(cluster.watch(member, WatchRequest::prefix("", 1)).await.is_err());
    }
}
