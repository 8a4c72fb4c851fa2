//! Cluster watchers
//!
//! One `kube::runtime::watcher` stream per kind feeds both the lister
//! store and the change cache:
//!
//! ```text
//! watcher ──▶ Writer<K> (lister) ──▶ (old, current) ──▶ EventSink::notify
//! ```
//!
//! The previous state of an object is read from the lister before the
//! event is applied, so updates carry both sides. Initial listing is not
//! reported object by object; its completion is reported as a resync.

use crate::apis::ingress::IngressClassFilter;
use crate::cache::event::{Change, EventSink, ResourceEvent};
use crate::cache::listers::{ListerWriters, Listers};
use crate::config::ControllerConfig;
use common::ResourceKind;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::reflector::{store::Writer, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of applying one watcher event to the lister
#[derive(Debug)]
pub(crate) enum Step<K> {
    Change(Change<K>),
    Resync,
    Skip,
}

/// Apply `event` to the lister and describe what changed
pub(crate) fn apply_event<K>(
    reader: &Store<K>,
    writer: &mut Writer<K>,
    event: watcher::Event<K>,
) -> Step<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let step = match &event {
        watcher::Event::Apply(obj) => {
            let old = reader.get(&ObjectRef::from_obj(obj));
            Step::Change(Change::new(old, Some(Arc::new(obj.clone()))))
        }
        watcher::Event::Delete(obj) => {
            let old = reader
                .get(&ObjectRef::from_obj(obj))
                .unwrap_or_else(|| Arc::new(obj.clone()));
            Step::Change(Change::new(Some(old), None))
        }
        watcher::Event::Init | watcher::Event::InitApply(_) => Step::Skip,
        watcher::Event::InitDone => Step::Resync,
    };
    writer.apply_watcher_event(&event);
    step
}

/// Drop ingresses of other classes; class transitions become add/delete
pub(crate) fn filter_ingress(filter: &IngressClassFilter, change: Change<Ingress>) -> Option<Change<Ingress>> {
    let old = change.old.filter(|ing| filter.is_valid(ing));
    let current = change.current.filter(|ing| filter.is_valid(ing));
    if old.is_none() && current.is_none() {
        return None;
    }
    Some(Change::new(old, current))
}

/// Drop ConfigMaps the change cache does not track
pub(crate) fn filter_config_map(sink: &dyn EventSink, change: Change<ConfigMap>) -> Option<Change<ConfigMap>> {
    let tracked = change
        .latest()
        .is_some_and(|cm| sink.is_valid_config_map(cm));
    tracked.then_some(change)
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

async fn run_watch<K, F>(
    api: Api<K>,
    reader: Store<K>,
    mut writer: Writer<K>,
    kind: ResourceKind,
    sink: Arc<dyn EventSink>,
    to_event: F,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: Fn(Change<K>) -> Option<ResourceEvent> + Send + 'static,
{
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);

    info!("Starting {} watcher", kind);

    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => match apply_event(&reader, &mut writer, event) {
                Step::Change(change) => {
                    let action = change.action();
                    match to_event(change) {
                        Some(event) => sink.notify(event),
                        None => debug!(%kind, action, "Ignoring filtered event"),
                    }
                }
                Step::Resync => {
                    info!("{} watcher initial sync complete", kind);
                    sink.notify(ResourceEvent::Resync);
                }
                Step::Skip => {}
            },
            Err(e) => {
                warn!("{} watcher error: {}", kind, e);
            }
        }
    }

    warn!("{} watcher stream ended", kind);
}

/// Start one watch task per kind
///
/// Pods are watched only when the listers were built with a pod store.
pub fn spawn_watchers(
    client: &Client,
    config: &ControllerConfig,
    listers: &Listers,
    writers: ListerWriters,
    sink: Arc<dyn EventSink>,
) -> Vec<JoinHandle<()>> {
    let namespace = config.watch_namespace.as_deref();
    let class_filter =
        IngressClassFilter::new(config.ingress_class.clone(), config.watch_ingress_without_class);
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(run_watch(
        api(client, namespace),
        listers.ingresses.clone(),
        writers.ingresses,
        ResourceKind::Ingress,
        sink.clone(),
        move |change| filter_ingress(&class_filter, change).map(ResourceEvent::Ingress),
    )));
    tasks.push(tokio::spawn(run_watch(
        api(client, namespace),
        listers.services.clone(),
        writers.services,
        ResourceKind::Service,
        sink.clone(),
        |change| Some(ResourceEvent::Service(change)),
    )));
    tasks.push(tokio::spawn(run_watch(
        api(client, namespace),
        listers.endpoints.clone(),
        writers.endpoints,
        ResourceKind::Endpoints,
        sink.clone(),
        |change| Some(ResourceEvent::Endpoints(change)),
    )));
    tasks.push(tokio::spawn(run_watch(
        api(client, namespace),
        listers.secrets.clone(),
        writers.secrets,
        ResourceKind::Secret,
        sink.clone(),
        |change| Some(ResourceEvent::Secret(change)),
    )));

    // Tracked ConfigMaps may live outside the watched namespace
    let config_map_sink = sink.clone();
    tasks.push(tokio::spawn(run_watch(
        Api::<ConfigMap>::all(client.clone()),
        listers.config_maps.clone(),
        writers.config_maps,
        ResourceKind::ConfigMap,
        sink.clone(),
        move |change| {
            filter_config_map(config_map_sink.as_ref(), change).map(ResourceEvent::ConfigMap)
        },
    )));

    if let (Some(reader), Some(writer)) = (listers.pods.clone(), writers.pods) {
        tasks.push(tokio::spawn(run_watch(
            api(client, namespace),
            reader,
            writer,
            ResourceKind::Pod,
            sink,
            |change| Some(ResourceEvent::Pod(change)),
        )));
    }

    info!(
        watchers = tasks.len(),
        namespace = namespace.unwrap_or("*"),
        "Started resource watchers"
    );
    tasks
}
