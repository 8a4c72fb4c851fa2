//! Test fixtures shared by the cache, resolver and ACME tests

use crate::cache::client::ClusterClient;
use crate::cache::event::object_key;
use crate::cache::queue::UpdateQueue;
use crate::error::{CacheError, CacheResult};
use crate::resolver::cert_store::{CertificateStore, SslCert};
use crate::resolver::tracker::Tracker;
use async_trait::async_trait;
use common::{File, ResourceKind, TrackingTarget};
use k8s_openapi::api::core::v1::{
    ConfigMap, EndpointAddress, EndpointSubset, Endpoints, Pod, PodSpec, PodStatus, Secret,
    Service, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{Ingress, IngressSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::runtime::reflector::store::Writer;
use kube::runtime::watcher;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn secret(namespace: &str, name: &str, data: &[(&str, &[u8])]) -> Secret {
    Secret {
        metadata: meta(namespace, name),
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn config_map(namespace: &str, name: &str, data: &[(String, String)]) -> ConfigMap {
    ConfigMap {
        metadata: meta(namespace, name),
        data: Some(data.iter().cloned().collect()),
        ..Default::default()
    }
}

pub fn ingress(namespace: &str, name: &str, class: Option<&str>) -> Ingress {
    Ingress {
        metadata: meta(namespace, name),
        spec: Some(IngressSpec {
            ingress_class_name: class.map(str::to_string),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service(namespace: &str, name: &str, selector: &[(&str, &str)]) -> Service {
    Service {
        metadata: meta(namespace, name),
        spec: Some(ServiceSpec {
            selector: Some(string_map(selector)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn endpoints(namespace: &str, name: &str) -> Endpoints {
    Endpoints {
        metadata: meta(namespace, name),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(vec![EndpointAddress {
                ip: "10.0.0.1".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    }
}

pub fn pod(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            labels: Some(string_map(labels)),
            ..meta(namespace, name)
        },
        spec: Some(PodSpec::default()),
        status: Some(PodStatus {
            pod_ip: Some("10.0.0.1".to_string()),
            ..Default::default()
        }),
    }
}

/// A pod being deleted, with the given status reason and pod IP
pub fn terminating_pod(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    reason: Option<&str>,
    pod_ip: Option<&str>,
) -> Pod {
    let mut pod = pod(namespace, name, labels);
    pod.metadata.deletion_timestamp =
        Some(serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap());
    pod.status = Some(PodStatus {
        reason: reason.map(str::to_string),
        pod_ip: pod_ip.map(str::to_string),
        ..Default::default()
    });
    pod
}

/// Self-signed certificate and its private key, both PEM encoded
pub fn self_signed(common_name: &str) -> (String, String) {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    let key_pair = KeyPair::generate().expect("Should generate key pair");
    let mut params =
        CertificateParams::new(vec![common_name.to_string()]).expect("Should build params");
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    let cert = params
        .self_signed(&key_pair)
        .expect("Should self-sign certificate");
    (cert.pem(), key_pair.serialize_pem())
}

/// A syntactically valid `DH PARAMETERS` PEM block
pub fn dh_params_pem() -> String {
    // SEQUENCE { INTEGER 23, INTEGER 5 }
    pem::encode(&pem::Pem::new(
        "DH PARAMETERS",
        vec![0x30, 0x06, 0x02, 0x01, 0x17, 0x02, 0x01, 0x05],
    ))
}

/// [`UpdateQueue`] counting signals
#[derive(Debug, Default)]
pub struct CountingQueue {
    signals: AtomicUsize,
}

impl CountingQueue {
    pub fn count(&self) -> usize {
        self.signals.load(Ordering::SeqCst)
    }
}

impl UpdateQueue for CountingQueue {
    fn notify(&self) {
        self.signals.fetch_add(1, Ordering::SeqCst);
    }
}

/// [`CertificateStore`] recording refresh/evict calls
#[derive(Debug, Default)]
pub struct RecordingCertStore {
    certs: Mutex<HashMap<String, SslCert>>,
    updated: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    resyncs: Mutex<usize>,
}

impl RecordingCertStore {
    pub fn insert(&self, namespace: &str, name: &str, cert: SslCert) {
        self.certs
            .lock()
            .unwrap()
            .insert(format!("{}/{}", namespace, name), cert);
    }

    pub fn updated(&self) -> Vec<String> {
        self.updated.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn resyncs(&self) -> usize {
        *self.resyncs.lock().unwrap()
    }
}

impl CertificateStore for RecordingCertStore {
    fn certificate(&self, namespace: &str, name: &str) -> CacheResult<SslCert> {
        let key = format!("{}/{}", namespace, name);
        self.certs
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| CacheError::not_found(ResourceKind::Secret, key))
    }

    fn update_secret(&self, key: &str) {
        self.updated.lock().unwrap().push(key.to_string());
    }

    fn delete_secret(&self, key: &str) {
        self.deleted.lock().unwrap().push(key.to_string());
    }

    fn resync(&self) {
        *self.resyncs.lock().unwrap() += 1;
    }

    fn add_or_update_dh_param(&self, name: &str, content: &[u8]) -> CacheResult<File> {
        Ok(File {
            filename: PathBuf::from(format!("/tmp/{}.pem", name)),
            sha256_hash: format!("{}", content.len()),
        })
    }
}

/// One recorded `track` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackCall {
    pub missing: bool,
    pub target: TrackingTarget,
    pub kind: ResourceKind,
    pub identity: String,
}

/// [`Tracker`] recording every call, duplicates included
#[derive(Debug, Default)]
pub struct RecordingTracker {
    calls: Mutex<Vec<TrackCall>>,
}

impl RecordingTracker {
    pub fn calls(&self) -> Vec<TrackCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Tracker for RecordingTracker {
    fn track(&self, missing: bool, target: &TrackingTarget, kind: ResourceKind, identity: &str) {
        self.calls.lock().unwrap().push(TrackCall {
            missing,
            target: target.clone(),
            kind,
            identity: identity.to_string(),
        });
    }
}

/// [`ClusterClient`] writing straight into the lister stores
pub struct FakeCluster {
    secrets: Mutex<Writer<Secret>>,
    config_maps: Mutex<Writer<ConfigMap>>,
    pods: Mutex<HashMap<String, Pod>>,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl FakeCluster {
    pub fn new(secrets: Writer<Secret>, config_maps: Writer<ConfigMap>) -> Self {
        Self {
            secrets: Mutex::new(secrets),
            config_maps: Mutex::new(config_maps),
            pods: Mutex::new(HashMap::new()),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().insert(object_key(&pod), pod);
    }

    /// Apply an object as if it had been created out of band
    pub fn seed_secret(&self, secret: Secret) {
        self.secrets
            .lock()
            .unwrap()
            .apply_watcher_event(&watcher::Event::Apply(secret));
    }

    pub fn seed_config_map(&self, config_map: ConfigMap) {
        self.config_maps
            .lock()
            .unwrap()
            .apply_watcher_event(&watcher::Event::Apply(config_map));
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create_secret(&self, secret: &Secret) -> CacheResult<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.seed_secret(secret.clone());
        Ok(())
    }

    async fn update_secret(&self, secret: &Secret) -> CacheResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.seed_secret(secret.clone());
        Ok(())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> CacheResult<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.seed_config_map(config_map.clone());
        Ok(())
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> CacheResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.seed_config_map(config_map.clone());
        Ok(())
    }

    async fn pod(&self, namespace: &str, name: &str) -> CacheResult<Option<Pod>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(&format!("{}/{}", namespace, name))
            .cloned())
    }
}
