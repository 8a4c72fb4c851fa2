//! Resource lookups for the rendering pipeline
//!
//! Reads go through the listers; the only cluster API calls are the pod
//! fallback when the pod watch is disabled and the create-or-update writes
//! used by ACME persistence.

use crate::apis::ingress::IngressClassFilter;
use crate::cache::client::ClusterClient;
use crate::cache::listers::{self, Listers};
use crate::error::{CacheError, CacheResult};
use crate::resolver::tracker::Tracker;
use common::{ObjectKey, ResourceKind, TrackingTarget};
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

/// Status reason of pods on an unreachable node
const NODE_LOST_REASON: &str = "NodeLost";

/// Lister-backed lookups plus the few cluster writes the controller makes
pub struct ResourceCache {
    listers: Listers,
    client: Arc<dyn ClusterClient>,
    tracker: Arc<dyn Tracker>,
    class_filter: IngressClassFilter,
    pod_namespace: Option<String>,
    pod_name: Option<String>,
}

impl ResourceCache {
    pub fn new(
        listers: Listers,
        client: Arc<dyn ClusterClient>,
        tracker: Arc<dyn Tracker>,
        class_filter: IngressClassFilter,
    ) -> Self {
        Self {
            listers,
            client,
            tracker,
            class_filter,
            pod_namespace: None,
            pod_name: None,
        }
    }

    /// Identity of the controller's own pod (`POD_NAMESPACE`/`POD_NAME`)
    pub fn with_pod_identity(mut self, namespace: Option<String>, name: Option<String>) -> Self {
        self.pod_namespace = namespace.filter(|ns| !ns.is_empty());
        self.pod_name = name.filter(|name| !name.is_empty());
        self
    }

    pub fn listers(&self) -> &Listers {
        &self.listers
    }

    /// Ingress by `namespace/name`, if it belongs to this controller
    pub fn ingress(&self, key: &str) -> CacheResult<Arc<Ingress>> {
        let key = ObjectKey::parse(key)?;
        let ingress = listers::get(&self.listers.ingresses, &key.namespace, &key.name)
            .ok_or_else(|| CacheError::not_found(ResourceKind::Ingress, &key))?;
        if !self.class_filter.is_valid(&ingress) {
            return Err(CacheError::MalformedData(
                "ingress class does not match".to_string(),
            ));
        }
        Ok(ingress)
    }

    /// All ingresses belonging to this controller
    pub fn ingress_list(&self) -> Vec<Arc<Ingress>> {
        self.listers
            .ingresses
            .state()
            .into_iter()
            .filter(|ingress| self.class_filter.is_valid(ingress))
            .collect()
    }

    pub fn service(&self, key: &str) -> CacheResult<Arc<Service>> {
        self.lookup(&self.listers.services, ResourceKind::Service, key)
    }

    pub fn secret(&self, key: &str) -> CacheResult<Arc<Secret>> {
        self.lookup(&self.listers.secrets, ResourceKind::Secret, key)
    }

    pub fn config_map(&self, key: &str) -> CacheResult<Arc<ConfigMap>> {
        self.lookup(&self.listers.config_maps, ResourceKind::ConfigMap, key)
    }

    /// Endpoints sharing the service's namespace and name
    pub fn endpoints(&self, service: &Service) -> CacheResult<Arc<Endpoints>> {
        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();
        listers::get(&self.listers.endpoints, &namespace, &name).ok_or_else(|| {
            CacheError::not_found(ResourceKind::Endpoints, ObjectKey::new(namespace, name))
        })
    }

    /// Terminating pods selected by a service
    ///
    /// Every selected pod is tracked against `target`, terminating or not.
    /// A pod counts as terminating when it has a deletion timestamp, was not
    /// lost with its node, and still has a pod IP.
    pub fn terminating_pods(
        &self,
        service: &Service,
        target: &TrackingTarget,
    ) -> CacheResult<Vec<Arc<Pod>>> {
        let pods = self.listers.pods.as_ref().ok_or_else(|| {
            CacheError::MalformedData(
                "pod lister wasn't started, remove --disable-pod-list to enable it".to_string(),
            )
        })?;
        let namespace = service.namespace().unwrap_or_default();
        let selector = service
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.clone())
            .unwrap_or_default();

        let mut terminating = Vec::new();
        for pod in listers::list_selected(pods, &namespace, &selector) {
            let identity = format!("{}/{}", namespace, pod.name_any());
            self.tracker.track(false, target, ResourceKind::Pod, &identity);
            if is_terminating(&pod) {
                terminating.push(pod);
            }
        }
        Ok(terminating)
    }

    /// Pod by `namespace/name`, straight from the cluster API when the pod
    /// watch is disabled
    pub async fn pod(&self, key: &str) -> CacheResult<Arc<Pod>> {
        let key = ObjectKey::parse(key)?;
        if let Some(pods) = &self.listers.pods {
            return listers::get(pods, &key.namespace, &key.name)
                .ok_or_else(|| CacheError::not_found(ResourceKind::Pod, &key));
        }
        self.client
            .pod(&key.namespace, &key.name)
            .await?
            .map(Arc::new)
            .ok_or_else(|| CacheError::not_found(ResourceKind::Pod, &key))
    }

    /// Namespace and name of the controller's own pod, checked for existence
    pub async fn ingress_pod_name(&self) -> CacheResult<(String, String)> {
        let (Some(namespace), Some(name)) = (&self.pod_namespace, &self.pod_name) else {
            return Err(CacheError::MalformedData(
                "missing POD_NAMESPACE or POD_NAME envvar".to_string(),
            ));
        };
        if self.client.pod(namespace, name).await?.is_none() {
            return Err(CacheError::not_found(
                ResourceKind::Pod,
                ObjectKey::new(namespace.as_str(), name.as_str()),
            ));
        }
        Ok((namespace.clone(), name.clone()))
    }

    /// Update the secret if the lister knows it, create it otherwise
    pub async fn create_or_update_secret(&self, mut secret: Secret) -> CacheResult<()> {
        let existing = listers::get(
            &self.listers.secrets,
            &secret.namespace().unwrap_or_default(),
            &secret.name_any(),
        );
        match existing {
            Some(existing) => {
                secret.metadata.resource_version = existing.metadata.resource_version.clone();
                self.client.update_secret(&secret).await
            }
            None => self.client.create_secret(&secret).await,
        }
    }

    /// Update the ConfigMap if the lister knows it, create it otherwise
    pub async fn create_or_update_config_map(&self, mut config_map: ConfigMap) -> CacheResult<()> {
        let existing = listers::get(
            &self.listers.config_maps,
            &config_map.namespace().unwrap_or_default(),
            &config_map.name_any(),
        );
        match existing {
            Some(existing) => {
                config_map.metadata.resource_version =
                    existing.metadata.resource_version.clone();
                self.client.update_config_map(&config_map).await
            }
            None => self.client.create_config_map(&config_map).await,
        }
    }

    fn lookup<K>(
        &self,
        store: &kube::runtime::reflector::Store<K>,
        kind: ResourceKind,
        key: &str,
    ) -> CacheResult<Arc<K>>
    where
        K: kube::Resource<DynamicType = ()> + Clone + 'static,
    {
        let key = ObjectKey::parse(key)?;
        debug!(%kind, %key, "Lister lookup");
        listers::get(store, &key.namespace, &key.name)
            .ok_or_else(|| CacheError::not_found(kind, &key))
    }
}

fn is_terminating(pod: &Pod) -> bool {
    let status = pod.status.as_ref();
    pod.metadata.deletion_timestamp.is_some()
        && status.and_then(|s| s.reason.as_deref()) != Some(NODE_LOST_REASON)
        && status
            .and_then(|s| s.pod_ip.as_deref())
            .is_some_and(|ip| !ip.is_empty())
}
