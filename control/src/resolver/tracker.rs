//! Dependency tracking
//!
//! Links generated artifacts ([`TrackingTarget`]) to the cluster objects they
//! were built from, including objects that were looked up and not found, so
//! that creating a previously missing object invalidates its dependents.

use crate::cache::{safe_read, safe_write};
use common::{ResourceKind, TrackingTarget};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::trace;

/// Records one edge per tracked lookup
pub trait Tracker: Send + Sync {
    /// `missing` is true when the lookup failed to find usable material
    fn track(&self, missing: bool, target: &TrackingTarget, kind: ResourceKind, identity: &str);
}

/// One recorded dependency
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub missing: bool,
    pub kind: ResourceKind,
    pub identity: String,
}

/// In-memory [`Tracker`]
#[derive(Debug, Default)]
pub struct DependencyTracker {
    edges: RwLock<HashMap<TrackingTarget, HashSet<Edge>>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Edges recorded for one target
    pub fn edges(&self, target: &TrackingTarget) -> Vec<Edge> {
        safe_read(&self.edges)
            .get(target)
            .map(|edges| edges.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Targets depending on an object, found or not
    pub fn targets_for(&self, kind: ResourceKind, identity: &str) -> Vec<TrackingTarget> {
        safe_read(&self.edges)
            .iter()
            .filter(|(_, edges)| {
                edges
                    .iter()
                    .any(|edge| edge.kind == kind && edge.identity == identity)
            })
            .map(|(target, _)| target.clone())
            .collect()
    }

    /// Forget every edge of a target, before it is rebuilt
    pub fn clear_target(&self, target: &TrackingTarget) {
        safe_write(&self.edges).remove(target);
    }

    /// Total number of recorded edges
    pub fn len(&self) -> usize {
        safe_read(&self.edges).values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Tracker for DependencyTracker {
    fn track(&self, missing: bool, target: &TrackingTarget, kind: ResourceKind, identity: &str) {
        trace!(%target, %kind, identity, missing, "Tracking dependency");
        safe_write(&self.edges)
            .entry(target.clone())
            .or_default()
            .insert(Edge {
                missing,
                kind,
                identity: identity.to_string(),
            });
    }
}
