//! Resource store
//!
//! One `kube::runtime::reflector` store per watched kind. Readers
//! ([`Listers`]) are cheap to clone and lock-free per kind; writers
//! ([`ListerWriters`]) are owned by the watch tasks that feed them.

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read side of the resource store
#[derive(Clone)]
pub struct Listers {
    pub ingresses: Store<Ingress>,
    pub services: Store<Service>,
    pub endpoints: Store<Endpoints>,
    pub secrets: Store<Secret>,
    pub config_maps: Store<ConfigMap>,
    /// Absent when the pod watch is disabled
    pub pods: Option<Store<Pod>>,
}

/// Write side of the resource store
pub struct ListerWriters {
    pub ingresses: Writer<Ingress>,
    pub services: Writer<Service>,
    pub endpoints: Writer<Endpoints>,
    pub secrets: Writer<Secret>,
    pub config_maps: Writer<ConfigMap>,
    pub pods: Option<Writer<Pod>>,
}

/// Create empty listers and the writers that fill them
pub fn listers(with_pods: bool) -> (Listers, ListerWriters) {
    let (ingresses, ingress_writer) = reflector::store();
    let (services, service_writer) = reflector::store();
    let (endpoints, endpoints_writer) = reflector::store();
    let (secrets, secret_writer) = reflector::store();
    let (config_maps, config_map_writer) = reflector::store();
    let (pods, pod_writer) = if with_pods {
        let (pods, writer) = reflector::store();
        (Some(pods), Some(writer))
    } else {
        (None, None)
    };

    (
        Listers {
            ingresses,
            services,
            endpoints,
            secrets,
            config_maps,
            pods,
        },
        ListerWriters {
            ingresses: ingress_writer,
            services: service_writer,
            endpoints: endpoints_writer,
            secrets: secret_writer,
            config_maps: config_map_writer,
            pods: pod_writer,
        },
    )
}

/// Point lookup by namespace and name
pub fn get<K>(store: &Store<K>, namespace: &str, name: &str) -> Option<Arc<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store.get(&ObjectRef::new(name).within(namespace))
}

/// Objects in `namespace` whose labels contain every `selector` pair
pub fn list_selected<K>(
    store: &Store<K>,
    namespace: &str,
    selector: &BTreeMap<String, String>,
) -> Vec<Arc<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store
        .state()
        .into_iter()
        .filter(|obj| obj.meta().namespace.as_deref() == Some(namespace))
        .filter(|obj| labels_match(obj.meta().labels.as_ref(), selector))
        .collect()
}

/// Equality-based label selector match
pub fn labels_match(
    labels: Option<&BTreeMap<String, String>>,
    selector: &BTreeMap<String, String>,
) -> bool {
    selector.iter().all(|(key, value)| {
        labels
            .and_then(|labels| labels.get(key))
            .is_some_and(|label| label == value)
    })
}
