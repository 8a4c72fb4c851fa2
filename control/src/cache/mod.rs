//! Change cache
//!
//! Sits between the cluster watchers and the configuration sync loop:
//!
//! ```text
//! watchers ──▶ EventSink (ChangeAggregator) ──▶ UpdateQueue ──▶ sync loop
//!                     │                                          │
//!                     ▼                                          ▼
//!              CertificateStore                       publish() ─▶ ChangeSnapshot
//!                                                     ResourceCache (lookups)
//! ```
//!
//! Watch events are buffered per kind and change type; one debounced signal
//! tells the sync loop to take the buffered change-set. Lookups go through
//! the listers filled by the same watchers.

pub mod aggregator;
pub mod client;
pub mod event;
pub mod listers;
pub mod lookup;
pub mod queue;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::ChangeAggregator;
pub use client::{ClusterClient, KubeClusterClient};
pub use event::{Change, Classified, EventSink, ResourceEvent};
pub use listers::{ListerWriters, Listers};
pub use lookup::ResourceCache;
pub use queue::{SignalQueue, UpdateQueue};
pub use snapshot::{ChangeSnapshot, ConfigData};

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Safe RwLock read helper that recovers from poisoning
#[inline]
pub(crate) fn safe_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during read, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// Safe RwLock write helper that recovers from poisoning
#[inline]
pub(crate) fn safe_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during write, recovering (data is still valid)");
        poisoned.into_inner()
    })
}
