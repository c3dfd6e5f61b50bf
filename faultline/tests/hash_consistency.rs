//! Hash consistency verification against the synthetic cluster.

use std::time::Duration;

use faultline::sim::SimCluster;
use faultline::{
    CheckError, ClientError, ErrorKind, HashField, HashVerifier, RetryPolicy, VerifierConfig,
    verify_cluster_hash,
};

// ============================================================================
// Test Utilities
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn cluster_with_writes(members: usize, writes: usize) -> SimCluster {
    let cluster = SimCluster::new(members);
    for i in 0..writes {
        cluster.put(format!("/registry/pods/{}", i % 4), format!("pod-{i}"));
    }
    cluster
}

// ============================================================================
// Agreement
// ============================================================================

#[tokio::test]
async fn test_identical_members_at_fixed_revision() {
    init_tracing();
    let cluster = cluster_with_writes(3, 10);

    let snapshots = verify_cluster_hash(&cluster, &cluster.members(), 10)
        .await
        .expect("members agree");

    assert_eq!(snapshots.len(), 3);
    for snapshot in &snapshots {
        assert_eq!(snapshot.hash_revision, 10);
        assert_eq!(snapshot.header_revision, 10);
        assert_eq!(snapshot.hash, snapshots[0].hash);
    }
}

#[tokio::test]
async fn test_latest_revision_query() {
    init_tracing();
    let cluster = cluster_with_writes(5, 37);

    let snapshots = verify_cluster_hash(&cluster, &cluster.members(), 0)
        .await
        .expect("members agree");
    assert!(snapshots.iter().all(|s| s.hash_revision == 37));
}

#[tokio::test]
async fn test_compaction_boundary_agrees() {
    init_tracing();
    let cluster = cluster_with_writes(3, 12);
    cluster.compact(4);

    let snapshots = verify_cluster_hash(&cluster, &cluster.members(), 12)
        .await
        .expect("members agree");
    assert!(snapshots.iter().all(|s| s.compact_revision == 4));
}

// ============================================================================
// Divergence
// ============================================================================

#[tokio::test]
async fn test_single_field_divergence_names_member() {
    init_tracing();
    for field in [HashField::Hash, HashField::HashRevision, HashField::CompactRevision] {
        for divergent in 0..3 {
            let cluster = cluster_with_writes(3, 10);
            cluster.inject_hash_divergence(divergent, field);
            let members = cluster.members();
            let name = members[divergent].name.clone();

            let err = verify_cluster_hash(&cluster, &members, 10)
                .await
                .expect_err("divergence detected");
            assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);
            match err {
                CheckError::Consistency {
                    field: found,
                    left,
                    right,
                    ..
                } => {
                    assert_eq!(found, field);
                    assert!(
                        left == name || right == name,
                        "{field} divergence on {name} reported between {left} and {right}"
                    );
                }
                other => panic!("unexpected error {other}"),
            }
        }
    }
}

#[tokio::test]
async fn test_middle_member_hash_divergence() {
    init_tracing();
    let cluster = cluster_with_writes(3, 10);
    cluster.inject_hash_divergence(1, HashField::Hash);

    let err = verify_cluster_hash(&cluster, &cluster.members(), 10)
        .await
        .expect_err("divergence detected");
    assert!(matches!(
        err,
        CheckError::Consistency { field: HashField::Hash, ref left, ref right, .. }
            if left == "m1" && right == "m2"
    ));
}

// ============================================================================
// Query failures
// ============================================================================

#[tokio::test]
async fn test_lagging_member_fails_query() {
    init_tracing();
    let cluster = cluster_with_writes(3, 5);
    cluster.lag(2, true);
    for i in 0..5 {
        cluster.put(format!("late-{i}"), "v");
    }

    let err = verify_cluster_hash(&cluster, &cluster.members(), 0)
        .await
        .expect_err("m3 is behind");
    assert_eq!(err.kind(), ErrorKind::RpcFailure);
    assert_eq!(err.member(), Some("m3"));
    assert!(matches!(
        err,
        CheckError::Rpc {
            source: ClientError::FutureRevision { requested: 10, current: 5 },
            ..
        }
    ));
}

#[tokio::test]
async fn test_member_ahead_of_requested_revision() {
    init_tracing();
    let cluster = cluster_with_writes(3, 10);

    let err = verify_cluster_hash(&cluster, &cluster.members(), 8)
        .await
        .expect_err("header revision is ahead");
    assert!(matches!(
        err,
        CheckError::RevisionMismatch { ref member, requested: 8, header: 10 } if member == "m1"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_member_exhausts_retries() {
    init_tracing();
    let cluster = cluster_with_writes(3, 10);
    cluster.set_unavailable(1, true);

    let verifier = HashVerifier::with_config(
        cluster.clone(),
        VerifierConfig::default().with_retry(RetryPolicy::new(
            4,
            Duration::from_millis(50),
            Duration::from_millis(200),
        )),
    );
    let start = tokio::time::Instant::now();
    let err = verifier
        .verify(&cluster.members(), 10)
        .await
        .expect_err("m2 unreachable");

    assert_eq!(
        err,
        CheckError::Rpc {
            member: "m2".into(),
            source: ClientError::Unavailable("m2".into()),
        }
    );
    // 50 + 100 + 200 between the four attempts.
    assert!(start.elapsed() >= Duration::from_millis(350));
}

#[tokio::test(start_paused = true)]
async fn test_member_recovers_within_retry_budget() {
    init_tracing();
    let cluster = cluster_with_writes(3, 10);
    cluster.set_unavailable(2, true);

    let healer = cluster.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        healer.set_unavailable(2, false);
    });

    let verifier = HashVerifier::new(cluster.clone());
    verifier
        .verify(&cluster.members(), 10)
        .await
        .expect("m3 came back");
}
