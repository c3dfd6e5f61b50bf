//! Synthetic in-memory cluster for exercising the checkers.
//!
//! [`SimCluster`] implements both store collaborator traits over one shared
//! history. Fault knobs cover what the checkers must survive or detect:
//!
//! | Knob | Effect |
//! |------|--------|
//! | [`SimCluster::lag`], [`SimCluster::put_on`] | a member falls behind the head |
//! | [`SimCluster::compact`] | watches starting at or below the boundary are canceled |
//! | [`SimCluster::inject_hash_divergence`] | one member reports a different hash query field |
//! | [`SimCluster::inject_watch_cancel`] | one subscription is canceled with a compaction revision |
//! | [`SimCluster::set_reset_every`] | subscriptions end without an error after N responses |
//! | [`SimCluster::set_unavailable`] | calls to a member fail as unreachable |
//! | [`SimCluster::inject_watch_error`] | one subscription fails with an error |
//!
//! [`SimCluster::with_seed`] draws watch batch sizes from a seeded
//! `ChaCha8Rng`, so a failing seed replays the same batching.

mod cluster;
mod stream;

pub use cluster::SimCluster;
