//! Process-wide failpoint registry.
//!
//! The registry is created once per test process and handed to every
//! wrapper by `Arc`. Drivers arm and disarm failpoints at any time while
//! in-flight wrappers read them before each I/O operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::action::FailpointAction;
use crate::error::FailpointResult;

#[derive(Debug)]
struct Entry {
    action: FailpointAction,
    hits: AtomicU64,
}

/// Registry of named failpoints.
///
/// A failpoint that was never armed, or was disarmed, is absent from the
/// registry and evaluates to `None`.
///
/// # Thread Safety
///
/// Reads take a shared lock and bump an atomic hit counter, so concurrent
/// wrappers never serialize on each other. Arm and disarm take the
/// exclusive lock.
#[derive(Debug, Default)]
pub struct FailpointRegistry {
    points: RwLock<HashMap<String, Entry>>,
}

impl FailpointRegistry {
    /// Create an empty registry with every failpoint disarmed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `name` with `action`, replacing any previous action.
    ///
    /// The hit counter survives re-arming.
    pub fn arm(&self, name: impl Into<String>, action: FailpointAction) {
        let name = name.into();
        tracing::debug!(failpoint = %name, %action, "arming failpoint");
        let mut points = self.points.write();
        match points.get_mut(&name) {
            Some(entry) => entry.action = action,
            None => {
                points.insert(
                    name,
                    Entry {
                        action,
                        hits: AtomicU64::new(0),
                    },
                );
            }
        }
    }

    /// Parse `spec` and arm `name` with the resulting action.
    ///
    /// See [`FailpointAction`] for the accepted grammar.
    pub fn arm_str(&self, name: impl Into<String>, spec: &str) -> FailpointResult<()> {
        let action = spec.parse()?;
        self.arm(name, action);
        Ok(())
    }

    /// Disarm `name`. Returns whether it was armed.
    pub fn disarm(&self, name: &str) -> bool {
        let removed = self.points.write().remove(name).is_some();
        if removed {
            tracing::debug!(failpoint = %name, "disarmed failpoint");
        }
        removed
    }

    /// Whether `name` is currently armed.
    pub fn is_armed(&self, name: &str) -> bool {
        self.points.read().contains_key(name)
    }

    /// Look up the action for `name`, counting a hit when armed.
    pub fn evaluate(&self, name: &str) -> Option<FailpointAction> {
        let points = self.points.read();
        let entry = points.get(name)?;
        entry.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.action)
    }

    /// Number of times `name` was evaluated while armed.
    pub fn hits(&self, name: &str) -> u64 {
        self.points
            .read()
            .get(name)
            .map(|entry| entry.hits.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of all armed failpoints, sorted by name.
    pub fn armed(&self) -> Vec<(String, FailpointAction)> {
        let mut armed: Vec<_> = self
            .points
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.action))
            .collect();
        armed.sort_by(|a, b| a.0.cmp(&b.0));
        armed
    }

    /// Disarm everything.
    pub fn clear(&self) {
        self.points.write().clear();
    }
}
