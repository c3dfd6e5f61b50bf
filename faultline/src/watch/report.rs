//! Per-member diagnostic reports returned by the checker.

use std::fmt;

use faultline_core::{Revision, WatchOperation};
use serde::{Deserialize, Serialize};

use crate::error::{CheckError, CheckResult};

/// Lifecycle phase of a watch worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerPhase {
    /// Subscription open, or waiting for a target above what was observed.
    Watching,
    /// Subscription lost, about to reopen from the last observed revision.
    Resuming,
    /// Worker stopped without a violation.
    Done,
    /// Worker stopped on a violation.
    Violated,
}

impl WorkerPhase {
    /// Whether the worker has stopped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerPhase::Done | WorkerPhase::Violated)
    }
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerPhase::Watching => f.write_str("watching"),
            WorkerPhase::Resuming => f.write_str("resuming"),
            WorkerPhase::Done => f.write_str("done"),
            WorkerPhase::Violated => f.write_str("violated"),
        }
    }
}

/// Outcome of one member's watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Every required revision was observed.
    Complete,
    /// No target revision was ever delivered, so nothing could be judged.
    Inconclusive,
    /// The watch failed or stopped short.
    Violated(CheckError),
}

/// What one worker observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberReport {
    /// Member name.
    pub member: String,
    /// Member address.
    pub endpoint: String,
    /// Highest revision observed (or skipped over by a compaction).
    pub last_observed_revision: Revision,
    /// Highest target revision delivered, if any.
    pub max_required_revision: Option<Revision>,
    /// Phase the worker ended in.
    pub phase: WorkerPhase,
    /// Outcome.
    pub verdict: Verdict,
    /// Subscriptions reopened after a server-side reset.
    pub resumptions: u32,
    /// Subscriptions reopened after a compaction cancel.
    pub compaction_recoveries: u32,
    /// Every subscription opened, with the responses it delivered.
    pub watch: Vec<WatchOperation>,
}

impl MemberReport {
    /// The violation, if any.
    pub fn violation(&self) -> Option<&CheckError> {
        match &self.verdict {
            Verdict::Violated(err) => Some(err),
            _ => None,
        }
    }

    /// Events observed across every subscription.
    pub fn event_count(&self) -> usize {
        self.watch.iter().map(WatchOperation::event_count).sum()
    }

    /// Revisions of every observed event, in delivery order.
    pub fn observed_revisions(&self) -> Vec<Revision> {
        self.watch
            .iter()
            .flat_map(|op| op.responses.iter())
            .flat_map(|resp| resp.events.iter())
            .map(|event| event.persisted.revision)
            .collect()
    }
}

/// Aggregated result of a completeness check, one report per member in
/// member order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessReport {
    /// Member reports.
    pub members: Vec<MemberReport>,
}

impl CompletenessReport {
    /// Every violation, in member order.
    pub fn violations(&self) -> Vec<&CheckError> {
        self.members.iter().filter_map(MemberReport::violation).collect()
    }

    /// Whether no member reported a violation.
    ///
    /// Inconclusive members count as clean.
    pub fn is_clean(&self) -> bool {
        self.members.iter().all(|m| m.violation().is_none())
    }

    /// Report for `member`, by name.
    pub fn member(&self, member: &str) -> Option<&MemberReport> {
        self.members.iter().find(|m| m.member == member)
    }

    /// The first violation as an error, or the report itself.
    pub fn into_result(self) -> CheckResult<Self> {
        let violation = self.violations().into_iter().next().cloned();
        match violation {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

impl fmt::Display for CompletenessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Watch Completeness ===")?;
        for m in &self.members {
            let required = m
                .max_required_revision
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string());
            write!(
                f,
                "{:<12} {:<9} observed={:<6} required={:<6} events={:<6} resumed={} compacted={}",
                m.member,
                m.phase,
                m.last_observed_revision,
                required,
                m.event_count(),
                m.resumptions,
                m.compaction_recoveries,
            )?;
            match &m.verdict {
                Verdict::Complete => writeln!(f)?,
                Verdict::Inconclusive => writeln!(f, "  (inconclusive)")?,
                Verdict::Violated(err) => writeln!(f, "  VIOLATION: {err}")?,
            }
        }
        Ok(())
    }
}
