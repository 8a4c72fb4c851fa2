//! Watch events
//!
//! Every observed change arrives as an `(old, current)` pair for one kind:
//!
//! | old     | current | meaning                          |
//! |---------|---------|----------------------------------|
//! | absent  | present | added                            |
//! | present | absent  | deleted                          |
//! | present | present | updated                          |
//! | absent  | absent  | unclassifiable, forces full sync |

use common::ResourceKind;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use std::sync::Arc;

/// `(old, current)` states of one object
#[derive(Debug)]
pub struct Change<K> {
    pub old: Option<Arc<K>>,
    pub current: Option<Arc<K>>,
}

// Manual impl: derive would require `K: Clone`
impl<K> Clone for Change<K> {
    fn clone(&self) -> Self {
        Self {
            old: self.old.clone(),
            current: self.current.clone(),
        }
    }
}

/// A [`Change`] sorted into what happened to the object
#[derive(Debug)]
pub enum Classified<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, current: Arc<K> },
    Deleted(Arc<K>),
    Unclassified,
}

impl<K> Change<K> {
    pub fn new(old: Option<Arc<K>>, current: Option<Arc<K>>) -> Self {
        Self { old, current }
    }

    pub fn added(current: K) -> Self {
        Self::new(None, Some(Arc::new(current)))
    }

    pub fn updated(old: K, current: K) -> Self {
        Self::new(Some(Arc::new(old)), Some(Arc::new(current)))
    }

    pub fn deleted(old: K) -> Self {
        Self::new(Some(Arc::new(old)), None)
    }

    pub fn unclassified() -> Self {
        Self::new(None, None)
    }

    pub fn classify(self) -> Classified<K> {
        match (self.old, self.current) {
            (None, Some(current)) => Classified::Added(current),
            (Some(old), Some(current)) => Classified::Updated { old, current },
            (Some(old), None) => Classified::Deleted(old),
            (None, None) => Classified::Unclassified,
        }
    }

    /// The most recent known state of the object
    pub fn latest(&self) -> Option<&Arc<K>> {
        self.current.as_ref().or(self.old.as_ref())
    }

    /// Action label for logs and metrics
    pub fn action(&self) -> &'static str {
        match (&self.old, &self.current) {
            (None, Some(_)) => "add",
            (Some(_), Some(_)) => "update",
            (Some(_), None) => "del",
            (None, None) => "unknown",
        }
    }
}

/// One watch event, tagged by kind
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Ingress(Change<Ingress>),
    Service(Change<Service>),
    Endpoints(Change<Endpoints>),
    Secret(Change<Secret>),
    ConfigMap(Change<ConfigMap>),
    Pod(Change<Pod>),
    /// Something changed but the watch layer cannot tell what (e.g. a relist)
    Resync,
}

impl ResourceEvent {
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            ResourceEvent::Ingress(_) => Some(ResourceKind::Ingress),
            ResourceEvent::Service(_) => Some(ResourceKind::Service),
            ResourceEvent::Endpoints(_) => Some(ResourceKind::Endpoints),
            ResourceEvent::Secret(_) => Some(ResourceKind::Secret),
            ResourceEvent::ConfigMap(_) => Some(ResourceKind::ConfigMap),
            ResourceEvent::Pod(_) => Some(ResourceKind::Pod),
            ResourceEvent::Resync => None,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            ResourceEvent::Ingress(change) => change.action(),
            ResourceEvent::Service(change) => change.action(),
            ResourceEvent::Endpoints(change) => change.action(),
            ResourceEvent::Secret(change) => change.action(),
            ResourceEvent::ConfigMap(change) => change.action(),
            ResourceEvent::Pod(change) => change.action(),
            ResourceEvent::Resync => "unknown",
        }
    }
}

/// `namespace/name` of a cluster object
pub fn object_key<K: ResourceExt>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Ingestion side of the change cache, handed to watchers
///
/// Watchers never see the aggregator itself, only this callback surface.
pub trait EventSink: Send + Sync {
    /// Ingest one watch event
    fn notify(&self, event: ResourceEvent);

    /// Check if a ConfigMap is one the cache tracks
    fn is_valid_config_map(&self, config_map: &ConfigMap) -> bool;
}
