//! Watch completeness checking.
//!
//! ## Architecture
//!
//! ```text
//! targets ──► distributor ──► queue ──► worker(m1) ──► watch(m1)
//!                        ├──► queue ──► worker(m2) ──► watch(m2)
//!                        └──► queue ──► worker(m3) ──► watch(m3)
//! ```
//!
//! Each worker moves through [`WorkerPhase`]s:
//!
//! - **Watching**: subscription open from `last_observed + 1`, or every
//!   target so far observed and waiting on the queue for a higher one
//! - **Resuming**: the server reset the stream, or a compaction canceled it;
//!   a new subscription is opened without losing progress
//! - **Done** / **Violated**: terminal
//!
//! Event order is only compared within one member, never across members.

mod checker;
mod distributor;
mod report;
mod worker;

pub use checker::{CompletenessChecker, run_completeness_checker};
pub use report::{CompletenessReport, MemberReport, Verdict, WorkerPhase};
