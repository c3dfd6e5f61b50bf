//! # faultline
//!
//! Consistency verification for replicated key-value store clusters under
//! injected faults.
//!
//! Two checkers prove the guarantees a cluster must keep while the fault
//! injector in [`faultline_failpoint`] silently drops peer traffic:
//!
//! - **Hash consistency**: every member hashes its keyspace at one fixed
//!   revision and adjacent members must agree ([`HashVerifier`],
//!   [`verify_cluster_hash`])
//! - **Watch completeness**: one watcher per member must observe every
//!   revision the test driver asks about, surviving stream resets and
//!   compaction ([`CompletenessChecker`], [`run_completeness_checker`])
//!
//! ## Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              faultline (this crate)                     │
//! │   Hash verifier, completeness checker, sim cluster      │
//! ├──────────────────────────┬──────────────────────────────┤
//! │  faultline-failpoint     │                              │
//! │  • Failpoint registry    │                              │
//! │  • Hijacked streams      │                              │
//! ├──────────────────────────┴──────────────────────────────┤
//! │                   faultline-core                        │
//! │  Store client traits, wire types, recording model       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use faultline::{CheckerConfig, run_completeness_checker, verify_cluster_hash};
//!
//! verify_cluster_hash(&client, &members, 0).await?;
//!
//! let (targets, rx) = tokio::sync::mpsc::channel(16);
//! let driver = tokio::spawn(async move {
//!     let revision = run_workload().await;
//!     targets.send(revision).await
//! });
//! let report = run_completeness_checker(
//!     client, &members, rx, shutdown, CheckerConfig::default(),
//! )
//! .await;
//! println!("{report}");
//! report.into_result()?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export all public items from sub-crates
pub use faultline_core::*;
pub use faultline_failpoint::*;

mod config;
mod error;
mod hashkv;
pub mod sim;
pub mod watch;

pub use config::{CheckerConfig, RetryPolicy, VerifierConfig};
pub use error::{CheckError, CheckResult, ErrorKind, HashField};
pub use hashkv::{HashSnapshot, HashSnapshotClient, HashVerifier, verify_cluster_hash};
pub use watch::{
    CompletenessChecker, CompletenessReport, MemberReport, Verdict, WorkerPhase,
    run_completeness_checker,
};
