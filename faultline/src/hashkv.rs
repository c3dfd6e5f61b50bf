//! Cross-member hash consistency verification.
//!
//! Every member hashes its keyspace at one fixed revision. Members that
//! applied the same history must produce the same hash, hash revision and
//! compaction boundary.

use faultline_core::{ClientError, HashKvClient, MemberEndpoint, Revision};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::{RetryPolicy, VerifierConfig};
use crate::error::{CheckError, CheckResult, HashField};

/// One member's answer to a hash query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashSnapshot {
    /// Member that answered.
    pub member: MemberEndpoint,
    /// Keyspace hash.
    pub hash: u32,
    /// Revision the hash covers.
    pub hash_revision: Revision,
    /// Compaction boundary when the hash was computed.
    pub compact_revision: Revision,
    /// Member's revision when it answered.
    pub header_revision: Revision,
}

impl HashSnapshot {
    fn field(&self, field: HashField) -> i64 {
        match field {
            HashField::HashRevision => self.hash_revision,
            HashField::CompactRevision => self.compact_revision,
            HashField::Hash => i64::from(self.hash),
        }
    }
}

/// Issues hash queries to single members, retrying transient failures.
#[derive(Debug, Clone)]
pub struct HashSnapshotClient<C> {
    client: C,
    retry: RetryPolicy,
}

impl<C> HashSnapshotClient<C>
where
    C: HashKvClient,
{
    /// Wrap a store client.
    pub fn new(client: C, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Query `member` at `revision` (`0` = latest).
    pub async fn snapshot(
        &self,
        member: &MemberEndpoint,
        revision: Revision,
    ) -> CheckResult<HashSnapshot> {
        query(&self.client, &self.retry, member, revision).await
    }
}

async fn query<C>(
    client: &C,
    retry: &RetryPolicy,
    member: &MemberEndpoint,
    revision: Revision,
) -> CheckResult<HashSnapshot>
where
    C: HashKvClient + ?Sized,
{
    let mut failures = 0u32;
    loop {
        match client.hash_kv(member, revision).await {
            Ok(resp) => {
                tracing::trace!(
                    %member,
                    revision,
                    hash = resp.hash,
                    header_revision = resp.header_revision,
                    "hash query answered"
                );
                return Ok(HashSnapshot {
                    member: member.clone(),
                    hash: resp.hash,
                    hash_revision: resp.hash_revision,
                    compact_revision: resp.compact_revision,
                    header_revision: resp.header_revision,
                });
            }
            Err(err) => {
                failures += 1;
                if !err.is_transient() || failures >= retry.max_attempts {
                    return Err(rpc_error(member, err));
                }
                let delay = retry.backoff(failures);
                tracing::debug!(%member, attempt = failures, ?delay, error = %err, "retrying hash query");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn rpc_error(member: &MemberEndpoint, source: ClientError) -> CheckError {
    CheckError::Rpc {
        member: member.name.clone(),
        source,
    }
}

/// Verifies that every member of a cluster hashes to the same keyspace.
///
/// # Example
///
/// ```ignore
/// let verifier = HashVerifier::new(client);
/// let snapshots = verifier.verify(&members, 0).await?;
/// println!("cluster agrees at revision {}", snapshots[0].hash_revision);
/// ```
#[derive(Debug, Clone)]
pub struct HashVerifier<C> {
    client: C,
    config: VerifierConfig,
}

impl<C> HashVerifier<C>
where
    C: HashKvClient,
{
    /// Verifier with default configuration.
    pub fn new(client: C) -> Self {
        Self::with_config(client, VerifierConfig::default())
    }

    /// Verifier with explicit configuration.
    pub fn with_config(client: C, config: VerifierConfig) -> Self {
        Self { client, config }
    }

    /// Query every member at `revision` and compare adjacent answers.
    ///
    /// With `revision == 0` the first member is asked for its current
    /// revision and all members, that one included, are then queried at it.
    /// Returns the snapshots in member order when they all agree.
    pub async fn verify(
        &self,
        members: &[MemberEndpoint],
        revision: Revision,
    ) -> CheckResult<Vec<HashSnapshot>> {
        verify_with(&self.client, &self.config, members, revision).await
    }
}

/// Verify hash agreement with the default configuration.
///
/// See [`HashVerifier::verify`].
pub async fn verify_cluster_hash<C>(
    client: &C,
    members: &[MemberEndpoint],
    revision: Revision,
) -> CheckResult<Vec<HashSnapshot>>
where
    C: HashKvClient + ?Sized,
{
    verify_with(client, &VerifierConfig::default(), members, revision).await
}

#[instrument(skip(client, config, members), fields(members = members.len()))]
async fn verify_with<C>(
    client: &C,
    config: &VerifierConfig,
    members: &[MemberEndpoint],
    revision: Revision,
) -> CheckResult<Vec<HashSnapshot>>
where
    C: HashKvClient + ?Sized,
{
    let first = members.first().ok_or(CheckError::NoMembers)?;

    let revision = if revision == 0 {
        let latest = query(client, &config.retry, first, 0).await?;
        tracing::debug!(member = %first, revision = latest.header_revision, "resolved latest revision");
        latest.header_revision
    } else {
        revision
    };

    let mut snapshots = Vec::with_capacity(members.len());
    for member in members {
        let snapshot = query(client, &config.retry, member, revision).await?;
        if snapshot.header_revision != revision {
            return Err(CheckError::RevisionMismatch {
                member: member.name.clone(),
                requested: revision,
                header: snapshot.header_revision,
            });
        }
        snapshots.push(snapshot);
    }

    for pair in snapshots.windows(2) {
        compare(&pair[0], &pair[1])?;
    }

    tracing::info!(revision, members = snapshots.len(), "cluster hash verified");
    Ok(snapshots)
}

fn compare(left: &HashSnapshot, right: &HashSnapshot) -> CheckResult<()> {
    for field in [HashField::HashRevision, HashField::CompactRevision, HashField::Hash] {
        let (left_value, right_value) = (left.field(field), right.field(field));
        if left_value != right_value {
            tracing::warn!(
                %field,
                left = %left.member,
                right = %right.member,
                left_value,
                right_value,
                "hash consistency violation"
            );
            return Err(CheckError::Consistency {
                field,
                left: left.member.name.clone(),
                right: right.member.name.clone(),
                left_value,
                right_value,
            });
        }
    }
    Ok(())
}
