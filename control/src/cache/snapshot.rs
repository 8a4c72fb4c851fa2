//! Published change-sets

use k8s_openapi::api::core::v1::{Endpoints, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Content of a tracked ConfigMap
pub type ConfigData = BTreeMap<String, String>;

/// Everything that changed between two publishes
///
/// Owned by the caller; the cache keeps no reference to it.
#[derive(Debug, Clone, Default)]
pub struct ChangeSnapshot {
    /// Global ConfigMap content as of the previous publish
    pub global_cur: Option<ConfigData>,
    /// Global ConfigMap content received since, if any
    pub global_new: Option<ConfigData>,
    /// TCP services ConfigMap content as of the previous publish
    pub tcp_config_map_cur: Option<ConfigData>,
    /// TCP services ConfigMap content received since, if any
    pub tcp_config_map_new: Option<ConfigData>,

    pub ingresses_del: Vec<Arc<Ingress>>,
    pub ingresses_upd: Vec<Arc<Ingress>>,
    pub ingresses_add: Vec<Arc<Ingress>>,
    pub endpoints: Vec<Arc<Endpoints>>,
    pub services_del: Vec<Arc<Service>>,
    pub services_upd: Vec<Arc<Service>>,
    pub services_add: Vec<Arc<Service>>,
    pub secrets_del: Vec<Arc<Secret>>,
    pub secrets_upd: Vec<Arc<Secret>>,
    pub secrets_add: Vec<Arc<Secret>>,
    pub pods: Vec<Arc<Pod>>,

    /// Human readable descriptors, e.g. `add/ingress:default/web`
    pub objects: Vec<String>,

    /// An unclassifiable event or resync arrived since the previous publish;
    /// the consumer should rebuild from the full object set
    pub full_sync: bool,
}

impl ChangeSnapshot {
    /// True if no change was buffered
    ///
    /// Independent of `full_sync`.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// True if the global ConfigMap content changed
    pub fn global_changed(&self) -> bool {
        changed(&self.global_cur, &self.global_new)
    }

    /// True if the TCP services ConfigMap content changed
    pub fn tcp_config_map_changed(&self) -> bool {
        changed(&self.tcp_config_map_cur, &self.tcp_config_map_new)
    }
}

/// New content differs from current content by structural equality
pub(crate) fn changed(cur: &Option<ConfigData>, new: &Option<ConfigData>) -> bool {
    match new {
        Some(new) => cur.as_ref() != Some(new),
        None => false,
    }
}
