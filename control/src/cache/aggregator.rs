//! Change aggregator
//!
//! Buffers watch events between two publishes and wakes the sync loop once
//! per burst.
//!
//! ## Debounce
//!
//! The first event after a publish arms a one-shot timer; when it expires the
//! update queue is signalled. Later events of the same burst do not re-arm or
//! extend the window, so a burst is picked up at most `wait_before_update`
//! after its first event:
//!
//! ```text
//! events:  x  x   x      x            (publish)   x
//! timer:   |----wait----▶ notify                  |----wait----▶ notify
//! ```

use crate::apis::metrics;
use crate::cache::event::{object_key, Classified, EventSink, ResourceEvent};
use crate::cache::queue::UpdateQueue;
use crate::cache::snapshot::{changed, ChangeSnapshot, ConfigData};
use crate::cache::{safe_read, safe_write};
use crate::resolver::cert_store::CertificateStore;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use std::mem;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Everything buffered since the previous publish
struct PendingState {
    global_cur: Option<ConfigData>,
    global_new: Option<ConfigData>,
    tcp_config_map_cur: Option<ConfigData>,
    tcp_config_map_new: Option<ConfigData>,

    ingresses_del: Vec<Arc<Ingress>>,
    ingresses_upd: Vec<Arc<Ingress>>,
    ingresses_add: Vec<Arc<Ingress>>,
    endpoints: Vec<Arc<Endpoints>>,
    services_del: Vec<Arc<Service>>,
    services_upd: Vec<Arc<Service>>,
    services_add: Vec<Arc<Service>>,
    secrets_del: Vec<Arc<Secret>>,
    secrets_upd: Vec<Arc<Secret>>,
    secrets_add: Vec<Arc<Secret>>,
    pods: Vec<Arc<Pod>>,

    need_full_sync: bool,
    /// No event since the previous publish
    clear: bool,
}

impl PendingState {
    fn new() -> Self {
        Self {
            global_cur: None,
            global_new: None,
            tcp_config_map_cur: None,
            tcp_config_map_new: None,
            ingresses_del: Vec::new(),
            ingresses_upd: Vec::new(),
            ingresses_add: Vec::new(),
            endpoints: Vec::new(),
            services_del: Vec::new(),
            services_upd: Vec::new(),
            services_add: Vec::new(),
            secrets_del: Vec::new(),
            secrets_upd: Vec::new(),
            secrets_add: Vec::new(),
            pods: Vec::new(),
            need_full_sync: false,
            clear: true,
        }
    }
}

/// Buffers watch events and publishes them as [`ChangeSnapshot`]s
pub struct ChangeAggregator {
    global_key: Option<String>,
    tcp_key: Option<String>,
    wait_before_update: Duration,
    cert_store: Arc<dyn CertificateStore>,
    queue: Arc<dyn UpdateQueue>,
    runtime: Handle,
    state: RwLock<PendingState>,
}

impl ChangeAggregator {
    /// `global_key`/`tcp_key` are the `namespace/name` of the tracked
    /// ConfigMaps; the debounce timer is spawned on `runtime`
    pub fn new(
        global_key: Option<String>,
        tcp_key: Option<String>,
        wait_before_update: Duration,
        cert_store: Arc<dyn CertificateStore>,
        queue: Arc<dyn UpdateQueue>,
        runtime: Handle,
    ) -> Self {
        Self {
            global_key,
            tcp_key,
            wait_before_update,
            cert_store,
            queue,
            runtime,
            state: RwLock::new(PendingState::new()),
        }
    }

    /// Take everything buffered since the previous publish
    pub fn publish(&self) -> ChangeSnapshot {
        let mut state = safe_write(&self.state);
        let full_sync = state.need_full_sync;

        let mut objects = Vec::new();
        if changed(&state.global_cur, &state.global_new) {
            objects.push("update/global".to_string());
        }
        if changed(&state.tcp_config_map_cur, &state.tcp_config_map_new) {
            objects.push("update/tcp-services".to_string());
        }
        describe(&mut objects, "del", "ingress", &state.ingresses_del);
        describe(&mut objects, "update", "ingress", &state.ingresses_upd);
        describe(&mut objects, "add", "ingress", &state.ingresses_add);
        describe(&mut objects, "update", "endpoint", &state.endpoints);
        describe(&mut objects, "del", "service", &state.services_del);
        describe(&mut objects, "update", "service", &state.services_upd);
        describe(&mut objects, "add", "service", &state.services_add);
        describe(&mut objects, "del", "secret", &state.secrets_del);
        describe(&mut objects, "update", "secret", &state.secrets_upd);
        describe(&mut objects, "add", "secret", &state.secrets_add);
        describe(&mut objects, "update", "pod", &state.pods);

        let snapshot = ChangeSnapshot {
            global_cur: state.global_cur.clone(),
            global_new: state.global_new.clone(),
            tcp_config_map_cur: state.tcp_config_map_cur.clone(),
            tcp_config_map_new: state.tcp_config_map_new.clone(),
            ingresses_del: mem::take(&mut state.ingresses_del),
            ingresses_upd: mem::take(&mut state.ingresses_upd),
            ingresses_add: mem::take(&mut state.ingresses_add),
            endpoints: mem::take(&mut state.endpoints),
            services_del: mem::take(&mut state.services_del),
            services_upd: mem::take(&mut state.services_upd),
            services_add: mem::take(&mut state.services_add),
            secrets_del: mem::take(&mut state.secrets_del),
            secrets_upd: mem::take(&mut state.secrets_upd),
            secrets_add: mem::take(&mut state.secrets_add),
            pods: mem::take(&mut state.pods),
            objects,
            full_sync,
        };

        if let Some(global) = state.global_new.take() {
            state.global_cur = Some(global);
        }
        if let Some(tcp) = state.tcp_config_map_new.take() {
            state.tcp_config_map_cur = Some(tcp);
        }
        state.clear = true;
        state.need_full_sync = false;
        drop(state);

        metrics::record_publish(snapshot.objects.len(), full_sync);
        info!(
            changes = snapshot.objects.len(),
            full_sync, "Published change snapshot"
        );
        snapshot
    }

    /// True if an unclassifiable event arrived since the previous publish
    ///
    /// Advisory only: an event may arrive before the next publish. Consumers
    /// act on [`ChangeSnapshot::full_sync`], read under the same lock as the
    /// buffers.
    pub fn need_full_sync(&self) -> bool {
        safe_read(&self.state).need_full_sync
    }

    fn is_tracked_key(&self, key: &str) -> bool {
        self.global_key.as_deref() == Some(key) || self.tcp_key.as_deref() == Some(key)
    }

    /// Buffer one event; returns false if the event is not of interest
    fn buffer(&self, state: &mut PendingState, event: ResourceEvent) -> bool {
        match event {
            ResourceEvent::Ingress(change) => match change.classify() {
                Classified::Added(ing) => state.ingresses_add.push(ing),
                Classified::Updated { current, .. } => state.ingresses_upd.push(current),
                Classified::Deleted(ing) => state.ingresses_del.push(ing),
                Classified::Unclassified => state.need_full_sync = true,
            },
            ResourceEvent::Service(change) => match change.classify() {
                Classified::Added(svc) => state.services_add.push(svc),
                Classified::Updated { current, .. } => state.services_upd.push(current),
                Classified::Deleted(svc) => state.services_del.push(svc),
                Classified::Unclassified => state.need_full_sync = true,
            },
            ResourceEvent::Endpoints(change) => match change.classify() {
                Classified::Added(ep) | Classified::Updated { current: ep, .. } => {
                    state.endpoints.push(ep)
                }
                Classified::Deleted(_) => {}
                Classified::Unclassified => state.need_full_sync = true,
            },
            ResourceEvent::Pod(change) => match change.classify() {
                Classified::Added(pod) | Classified::Updated { current: pod, .. } => {
                    state.pods.push(pod)
                }
                Classified::Deleted(_) => {}
                Classified::Unclassified => state.need_full_sync = true,
            },
            ResourceEvent::Secret(change) => match change.classify() {
                Classified::Added(secret) => {
                    self.cert_store.update_secret(&object_key(secret.as_ref()));
                    state.secrets_add.push(secret);
                }
                Classified::Updated { current, .. } => {
                    self.cert_store.update_secret(&object_key(current.as_ref()));
                    state.secrets_upd.push(current);
                }
                Classified::Deleted(secret) => {
                    self.cert_store.delete_secret(&object_key(secret.as_ref()));
                    state.secrets_del.push(secret);
                }
                Classified::Unclassified => {
                    self.cert_store.resync();
                    state.need_full_sync = true;
                }
            },
            ResourceEvent::ConfigMap(change) => match change.classify() {
                Classified::Added(cm) | Classified::Updated { current: cm, .. } => {
                    let key = object_key(cm.as_ref());
                    let data = cm.data.clone().unwrap_or_default();
                    if self.global_key.as_deref() == Some(key.as_str()) {
                        state.global_new = Some(data);
                    } else if self.tcp_key.as_deref() == Some(key.as_str()) {
                        state.tcp_config_map_new = Some(data);
                    } else {
                        return false;
                    }
                }
                // Removal keeps the last known content
                Classified::Deleted(cm) => {
                    if !self.is_tracked_key(&object_key(cm.as_ref())) {
                        return false;
                    }
                }
                Classified::Unclassified => state.need_full_sync = true,
            },
            // Relists bypass per-object events; reconcile materialized secrets
            ResourceEvent::Resync => {
                self.cert_store.resync();
                state.need_full_sync = true;
            }
        }
        true
    }

    fn arm_debounce(&self) {
        let queue = self.queue.clone();
        let wait = self.wait_before_update;
        self.runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            queue.notify();
        });
    }
}

impl EventSink for ChangeAggregator {
    fn notify(&self, event: ResourceEvent) {
        let kind = event
            .kind()
            .map(|kind| kind.as_str())
            .unwrap_or("resync");
        let action = event.action();

        let mut state = safe_write(&self.state);
        if !self.buffer(&mut state, event) {
            return;
        }
        debug!(kind, action, "Buffered resource event");
        metrics::record_cache_event(kind, action);

        let arm = state.clear;
        state.clear = false;
        drop(state);

        if arm {
            self.arm_debounce();
        }
    }

    fn is_valid_config_map(&self, config_map: &ConfigMap) -> bool {
        self.is_tracked_key(&object_key(config_map))
    }
}

fn describe<K: kube::ResourceExt>(
    objects: &mut Vec<String>,
    action: &str,
    kind: &str,
    items: &[Arc<K>],
) {
    objects.extend(
        items
            .iter()
            .map(|item| format!("{}/{}:{}", action, kind, object_key(item.as_ref()))),
    );
}
