//! Certificate store
//!
//! Materializes secret content (certificate + key bundles, CA bundles, CRLs,
//! DH parameters) as files under one directory, so the proxy configuration
//! can reference stable paths and the resolver only ever hands out
//! filename + hash handles.
//!
//! ## Layout
//!
//! ```text
//! <dir>/
//! ├── <namespace>_<name>.pem       # tls.crt + tls.key
//! ├── <namespace>_<name>_ca.pem    # ca.crt
//! ├── <namespace>_<name>_crl.pem   # ca.crl
//! └── <namespace>_<name>.pem       # dhparam.pem (DH secrets)
//! ```
//!
//! `update_secret`/`delete_secret`/`resync` are called by the change
//! aggregator while it holds its lock; implementations must stay local
//! (filesystem only).

use crate::cache::listers;
use crate::cache::{safe_read, safe_write};
use crate::error::{CacheError, CacheResult};
use chrono::{DateTime, Utc};
use common::{
    File, ObjectKey, ResourceKind, CA_CERT_KEY, CA_CRL_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::Store;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Parsed leaf certificate metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub not_after: DateTime<Utc>,
}

/// Material materialized from one secret
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SslCert {
    /// Certificate + key bundle, when the secret has both `tls.crt` and `tls.key`
    pub pem_file_name: Option<PathBuf>,
    /// SHA-256 over everything materialized from the secret
    pub pem_sha: String,
    /// Leaf certificate metadata, present with `pem_file_name`
    pub certificate: Option<CertificateInfo>,
    /// CA bundle, when the secret has `ca.crt`
    pub ca_file_name: Option<PathBuf>,
    /// CRL, when the secret has `ca.crl`
    pub crl_file_name: Option<PathBuf>,
}

/// Secret material materialization
pub trait CertificateStore: Send + Sync {
    /// Material for a secret, materializing it on first use
    fn certificate(&self, namespace: &str, name: &str) -> CacheResult<SslCert>;

    /// Refresh the materialized copy of a secret (`namespace/name`)
    fn update_secret(&self, key: &str);

    /// Drop the materialized copy of a secret (`namespace/name`)
    fn delete_secret(&self, key: &str);

    /// Reconcile every materialized secret against the secret lister
    ///
    /// Called after a relist, when changes may have reached the lister
    /// without a per-object event.
    fn resync(&self);

    /// Write DH parameters to `<name>.pem`
    fn add_or_update_dh_param(&self, name: &str, content: &[u8]) -> CacheResult<File>;
}

/// Content rendered from one secret, not yet written
struct Rendered {
    cert: SslCert,
    files: Vec<(PathBuf, Vec<u8>)>,
}

/// Filesystem [`CertificateStore`] reading secrets through the secret lister
///
/// Materialization, refresh and eviction of one secret are serialized by a
/// per-key lock; distinct secrets never wait on each other.
pub struct LocalCertificateStore {
    dir: PathBuf,
    secrets: Store<Secret>,
    certs: RwLock<HashMap<String, SslCert>>,
    // Entries live as long as the store so a key never maps to two locks
    key_locks: RwLock<HashMap<String, Arc<RwLock<()>>>>,
}

impl LocalCertificateStore {
    /// Create the store, creating `dir` (mode 0700 on Unix) if needed
    pub fn new(dir: impl Into<PathBuf>, secrets: Store<Secret>) -> CacheResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }

        info!(cert_dir = %dir.display(), "Initialized certificate store");

        Ok(Self {
            dir,
            secrets,
            certs: RwLock::new(HashMap::new()),
            key_locks: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    fn key_lock(&self, key: &str) -> Arc<RwLock<()>> {
        if let Some(lock) = safe_read(&self.key_locks).get(key) {
            return lock.clone();
        }
        safe_write(&self.key_locks)
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Read a secret from the lister and render its material
    fn render(&self, key: &ObjectKey) -> CacheResult<Rendered> {
        let secret = listers::get(&self.secrets, &key.namespace, &key.name)
            .ok_or_else(|| CacheError::not_found(ResourceKind::Secret, key))?;
        let data = secret.data.clone().unwrap_or_default();
        let base = format!("{}_{}", key.namespace, key.name);
        let mut hasher = Sha256::new();
        let mut cert = SslCert::default();
        let mut files = Vec::new();

        if let (Some(crt), Some(tls_key)) = (data.get(TLS_CERT_KEY), data.get(TLS_PRIVATE_KEY_KEY)) {
            let info = parse_certificate(&crt.0).map_err(|e| {
                CacheError::MalformedData(format!(
                    "secret '{}' has an invalid '{}': {}",
                    key, TLS_CERT_KEY, e
                ))
            })?;
            let mut bundle = crt.0.clone();
            if !bundle.ends_with(b"\n") {
                bundle.push(b'\n');
            }
            bundle.extend_from_slice(&tls_key.0);

            let path = self.path(&format!("{}.pem", base));
            hasher.update(&bundle);
            cert.pem_file_name = Some(path.clone());
            cert.certificate = Some(info);
            files.push((path, bundle));
        }

        if let Some(ca) = data.get(CA_CERT_KEY) {
            let path = self.path(&format!("{}_ca.pem", base));
            hasher.update(&ca.0);
            cert.ca_file_name = Some(path.clone());
            files.push((path, ca.0.clone()));

            if let Some(crl) = data.get(CA_CRL_KEY) {
                let path = self.path(&format!("{}_crl.pem", base));
                hasher.update(&crl.0);
                cert.crl_file_name = Some(path.clone());
                files.push((path, crl.0.clone()));
            }
        }

        cert.pem_sha = hex::encode(hasher.finalize());
        Ok(Rendered { cert, files })
    }

    /// Render a secret and write its material to disk
    fn materialize(&self, key: &ObjectKey) -> CacheResult<SslCert> {
        self.write(key, self.render(key)?)
    }

    fn write(&self, key: &ObjectKey, rendered: Rendered) -> CacheResult<SslCert> {
        for (path, content) in &rendered.files {
            write_private(path, content)?;
        }
        debug!(secret = %key, sha = %rendered.cert.pem_sha, "Materialized secret");
        Ok(rendered.cert)
    }

    /// Re-render a materialized secret; the caller holds its key lock
    fn refresh(&self, key: &str) {
        let Some(current) = safe_read(&self.certs).get(key).cloned() else {
            return;
        };
        let refreshed = ObjectKey::parse(key)
            .map_err(CacheError::from)
            .and_then(|object| {
                let rendered = self.render(&object)?;
                if rendered.cert == current {
                    return Ok(None);
                }
                self.write(&object, rendered).map(Some)
            });

        match refreshed {
            Ok(None) => {}
            Ok(Some(cert)) => {
                self.remove_dropped(&current, &cert);
                safe_write(&self.certs).insert(key.to_string(), cert);
                debug!(secret = key, "Refreshed materialized secret");
            }
            Err(e) => {
                warn!("Failed to refresh secret {}: {}", key, e);
                self.evict(key);
            }
        }
    }

    /// Drop a materialized secret; the caller holds its key lock
    fn evict(&self, key: &str) {
        let removed = safe_write(&self.certs).remove(key);
        if let Some(cert) = removed {
            self.remove_files(&cert);
            debug!(secret = key, "Evicted materialized secret");
        }
    }

    /// Remove files `old` had and `new` no longer produces
    fn remove_dropped(&self, old: &SslCert, new: &SslCert) {
        let dropped = |old: &Option<PathBuf>, new: &Option<PathBuf>| {
            if old.is_some() && old != new {
                old.clone()
            } else {
                None
            }
        };
        self.remove_files(&SslCert {
            pem_file_name: dropped(&old.pem_file_name, &new.pem_file_name),
            ca_file_name: dropped(&old.ca_file_name, &new.ca_file_name),
            crl_file_name: dropped(&old.crl_file_name, &new.crl_file_name),
            ..SslCert::default()
        });
    }

    fn remove_files(&self, cert: &SslCert) {
        let files = [&cert.pem_file_name, &cert.ca_file_name, &cert.crl_file_name];
        for path in files.into_iter().flatten() {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

impl CertificateStore for LocalCertificateStore {
    fn certificate(&self, namespace: &str, name: &str) -> CacheResult<SslCert> {
        let key = ObjectKey::new(namespace, name);
        let cache_key = key.to_string();
        if let Some(cert) = safe_read(&self.certs).get(&cache_key) {
            return Ok(cert.clone());
        }

        let lock = self.key_lock(&cache_key);
        let _guard = safe_write(&lock);
        if let Some(cert) = safe_read(&self.certs).get(&cache_key) {
            return Ok(cert.clone());
        }
        let cert = self.materialize(&key)?;
        safe_write(&self.certs).insert(cache_key, cert.clone());
        Ok(cert)
    }

    fn update_secret(&self, key: &str) {
        // Only secrets already referenced are refreshed; others materialize lazily
        let lock = self.key_lock(key);
        let _guard = safe_write(&lock);
        self.refresh(key);
    }

    fn delete_secret(&self, key: &str) {
        let lock = self.key_lock(key);
        let _guard = safe_write(&lock);
        self.evict(key);
    }

    fn resync(&self) {
        let keys: Vec<String> = safe_read(&self.certs).keys().cloned().collect();
        for key in keys {
            let lock = self.key_lock(&key);
            let _guard = safe_write(&lock);
            let listed = ObjectKey::parse(&key)
                .map(|object| listers::get(&self.secrets, &object.namespace, &object.name).is_some())
                .unwrap_or(false);
            if listed {
                self.refresh(&key);
            } else {
                self.evict(&key);
            }
        }
        debug!("Reconciled materialized secrets with the secret lister");
    }

    fn add_or_update_dh_param(&self, name: &str, content: &[u8]) -> CacheResult<File> {
        let block = pem::parse(content)
            .map_err(|e| CacheError::MalformedData(format!("invalid dh-param '{}': {}", name, e)))?;
        if block.tag() != "DH PARAMETERS" {
            return Err(CacheError::MalformedData(format!(
                "invalid dh-param '{}': unexpected PEM block '{}'",
                name,
                block.tag()
            )));
        }

        let path = self.path(&format!("{}.pem", name));
        write_private(&path, content)?;
        Ok(File {
            filename: path,
            sha256_hash: hex::encode(Sha256::digest(content)),
        })
    }
}

/// Parse the first certificate of a PEM chain
pub fn parse_certificate(pem_chain: &[u8]) -> Result<CertificateInfo, String> {
    let blocks = pem::parse_many(pem_chain).map_err(|e| e.to_string())?;
    let leaf = blocks
        .iter()
        .find(|block| block.tag() == "CERTIFICATE")
        .ok_or_else(|| "cannot find a proper pem block".to_string())?;
    parse_certificate_der(leaf.contents())
}

/// Parse one DER encoded certificate
pub fn parse_certificate_der(der: &[u8]) -> Result<CertificateInfo, String> {
    use x509_parser::extensions::GeneralName;

    let (_, cert) = x509_parser::parse_x509_certificate(der).map_err(|e| e.to_string())?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let dns_names = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|san| {
            san.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let timestamp = cert.validity().not_after.timestamp();
    let not_after = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| format!("certificate expiry out of range: {}", timestamp))?;

    Ok(CertificateInfo {
        common_name,
        dns_names,
        not_after,
    })
}

/// Write a file readable by the owner only
fn write_private(path: &Path, content: &[u8]) -> io::Result<()> {
    fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::{dh_params_pem, secret, self_signed};
    use kube::runtime::reflector;
    use kube::runtime::watcher;
    use std::thread;
    use std::time::Duration;

    fn store_with(secrets: Vec<Secret>) -> (tempfile::TempDir, LocalCertificateStore, reflector::store::Writer<Secret>) {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let (reader, mut writer) = reflector::store();
        for secret in secrets {
            writer.apply_watcher_event(&watcher::Event::Apply(secret));
        }
        let store = LocalCertificateStore::new(dir.path().join("ssl"), reader)
            .expect("Should create certificate store");
        (dir, store, writer)
    }

    #[test]
    fn test_materializes_certificate_bundle() {
        let (crt, key) = self_signed("example.com");
        let (_dir, store, _writer) = store_with(vec![secret(
            "default",
            "tls",
            &[(TLS_CERT_KEY, crt.as_bytes()), (TLS_PRIVATE_KEY_KEY, key.as_bytes())],
        )]);

        let cert = store.certificate("default", "tls").expect("Should materialize");
        let path = cert.pem_file_name.expect("Should have bundle");
        assert_eq!(path, store.dir().join("default_tls.pem"));

        let content = fs::read_to_string(&path).expect("Should read bundle");
        assert!(content.contains("BEGIN CERTIFICATE"));
        assert!(content.contains("PRIVATE KEY"));

        let info = cert.certificate.expect("Should parse certificate");
        assert_eq!(info.common_name, "example.com");
        assert_eq!(info.dns_names, vec!["example.com".to_string()]);
        assert!(info.not_after > Utc::now());
        assert_eq!(cert.pem_sha.len(), 64);
        assert!(cert.ca_file_name.is_none());
    }

    #[test]
    fn test_materializes_ca_and_crl() {
        let (ca, _) = self_signed("ca.example.com");
        let (_dir, store, _writer) = store_with(vec![secret(
            "default",
            "ca",
            &[(CA_CERT_KEY, ca.as_bytes()), (CA_CRL_KEY, b"crl")],
        )]);

        let cert = store.certificate("default", "ca").expect("Should materialize");
        assert!(cert.pem_file_name.is_none());
        assert_eq!(cert.ca_file_name, Some(store.dir().join("default_ca_ca.pem")));
        assert_eq!(cert.crl_file_name, Some(store.dir().join("default_ca_crl.pem")));
    }

    #[test]
    fn test_secret_without_material_yields_empty_cert() {
        let (_dir, store, _writer) =
            store_with(vec![secret("default", "opaque", &[("password", b"s3cret")])]);

        let cert = store.certificate("default", "opaque").expect("Should succeed");
        assert!(cert.pem_file_name.is_none());
        assert!(cert.ca_file_name.is_none());
    }

    #[test]
    fn test_missing_secret_is_not_found() {
        let (_dir, store, _writer) = store_with(vec![]);
        let err = store.certificate("default", "missing").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn test_invalid_certificate_is_malformed() {
        let (_dir, store, _writer) = store_with(vec![secret(
            "default",
            "broken",
            &[(TLS_CERT_KEY, b"not a certificate"), (TLS_PRIVATE_KEY_KEY, b"nope")],
        )]);
        let err = store.certificate("default", "broken").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MalformedData);
    }

    #[test]
    fn test_update_refreshes_known_secret() {
        let (crt_v1, key_v1) = self_signed("v1.example.com");
        let (crt_v2, key_v2) = self_signed("v2.example.com");
        let (_dir, store, mut writer) = store_with(vec![secret(
            "default",
            "tls",
            &[(TLS_CERT_KEY, crt_v1.as_bytes()), (TLS_PRIVATE_KEY_KEY, key_v1.as_bytes())],
        )]);
        let v1 = store.certificate("default", "tls").unwrap();

        writer.apply_watcher_event(&watcher::Event::Apply(secret(
            "default",
            "tls",
            &[(TLS_CERT_KEY, crt_v2.as_bytes()), (TLS_PRIVATE_KEY_KEY, key_v2.as_bytes())],
        )));
        store.update_secret("default/tls");

        let v2 = store.certificate("default", "tls").unwrap();
        assert_ne!(v1.pem_sha, v2.pem_sha);
        assert_eq!(v2.certificate.unwrap().common_name, "v2.example.com");
    }

    #[test]
    fn test_update_ignores_unreferenced_secret() {
        let (_dir, store, _writer) = store_with(vec![]);
        store.update_secret("default/unknown");
        assert!(safe_read(&store.certs).is_empty());
    }

    #[test]
    fn test_delete_evicts_and_removes_files() {
        let (crt, key) = self_signed("example.com");
        let (_dir, store, mut writer) = store_with(vec![secret(
            "default",
            "tls",
            &[(TLS_CERT_KEY, crt.as_bytes()), (TLS_PRIVATE_KEY_KEY, key.as_bytes())],
        )]);
        let cert = store.certificate("default", "tls").unwrap();
        let path = cert.pem_file_name.unwrap();
        assert!(path.exists());

        writer.apply_watcher_event(&watcher::Event::Delete(secret("default", "tls", &[])));
        store.delete_secret("default/tls");

        assert!(!path.exists());
        assert_eq!(
            store.certificate("default", "tls").unwrap_err().kind(),
            crate::error::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_dh_param_written_with_deterministic_name() {
        let (_dir, store, _writer) = store_with(vec![]);
        let file = store
            .add_or_update_dh_param("default_dh", dh_params_pem().as_bytes())
            .expect("Should write dh-param");
        assert_eq!(file.filename, store.dir().join("default_dh.pem"));
        assert_eq!(file.sha256_hash, hex::encode(Sha256::digest(dh_params_pem().as_bytes())));
    }

    #[test]
    fn test_dh_param_rejects_other_pem_blocks() {
        let (crt, _) = self_signed("example.com");
        let (_dir, store, _writer) = store_with(vec![]);
        let err = store
            .add_or_update_dh_param("default_dh", crt.as_bytes())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MalformedData);
    }

    fn tls_secret(crt: &str, key: &str) -> Secret {
        secret(
            "default",
            "tls",
            &[(TLS_CERT_KEY, crt.as_bytes()), (TLS_PRIVATE_KEY_KEY, key.as_bytes())],
        )
    }

    #[test]
    fn test_resync_refreshes_secrets_changed_during_relist() {
        let (crt_v1, key_v1) = self_signed("v1.example.com");
        let (crt_v2, key_v2) = self_signed("v2.example.com");
        let (_dir, store, mut writer) = store_with(vec![tls_secret(&crt_v1, &key_v1)]);
        let v1 = store.certificate("default", "tls").unwrap();

        // Relist delivers the new content without a per-object event
        writer.apply_watcher_event(&watcher::Event::Init);
        writer.apply_watcher_event(&watcher::Event::InitApply(tls_secret(&crt_v2, &key_v2)));
        writer.apply_watcher_event(&watcher::Event::InitDone);
        assert_eq!(store.certificate("default", "tls").unwrap(), v1);

        store.resync();

        let v2 = store.certificate("default", "tls").unwrap();
        assert_ne!(v1.pem_sha, v2.pem_sha);
        assert_eq!(v2.certificate.unwrap().common_name, "v2.example.com");
        let content = fs::read(v2.pem_file_name.unwrap()).unwrap();
        assert!(content.starts_with(crt_v2.as_bytes()));
    }

    #[test]
    fn test_resync_evicts_secrets_gone_after_relist() {
        let (crt, key) = self_signed("example.com");
        let (_dir, store, mut writer) = store_with(vec![tls_secret(&crt, &key)]);
        let path = store.certificate("default", "tls").unwrap().pem_file_name.unwrap();

        writer.apply_watcher_event(&watcher::Event::Init);
        writer.apply_watcher_event(&watcher::Event::InitDone);
        store.resync();

        assert!(!path.exists());
        assert_eq!(
            store.certificate("default", "tls").unwrap_err().kind(),
            crate::error::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_resync_keeps_unchanged_material() {
        let (crt, key) = self_signed("example.com");
        let (_dir, store, _writer) = store_with(vec![tls_secret(&crt, &key)]);
        let before = store.certificate("default", "tls").unwrap();

        store.resync();

        assert_eq!(store.certificate("default", "tls").unwrap(), before);
        assert!(before.pem_file_name.unwrap().exists());
    }

    #[test]
    fn test_refresh_removes_files_no_longer_produced() {
        let (crt, key) = self_signed("example.com");
        let (ca, _) = self_signed("ca.example.com");
        let (_dir, store, mut writer) = store_with(vec![secret(
            "default",
            "tls",
            &[
                (TLS_CERT_KEY, crt.as_bytes()),
                (TLS_PRIVATE_KEY_KEY, key.as_bytes()),
                (CA_CERT_KEY, ca.as_bytes()),
                (CA_CRL_KEY, &b"crl"[..]),
            ],
        )]);
        let before = store.certificate("default", "tls").unwrap();
        let ca_path = before.ca_file_name.clone().unwrap();
        let crl_path = before.crl_file_name.clone().unwrap();
        assert!(ca_path.exists());

        writer.apply_watcher_event(&watcher::Event::Apply(tls_secret(&crt, &key)));
        store.update_secret("default/tls");

        let after = store.certificate("default", "tls").unwrap();
        assert!(after.ca_file_name.is_none());
        assert!(!ca_path.exists());
        assert!(!crl_path.exists());
        assert!(after.pem_file_name.unwrap().exists());
    }

    #[test]
    fn test_update_waits_for_in_flight_lookup() {
        let (crt_v1, key_v1) = self_signed("v1.example.com");
        let (crt_v2, key_v2) = self_signed("v2.example.com");
        let (_dir, store, mut writer) = store_with(vec![tls_secret(&crt_v1, &key_v1)]);

        // A lookup holds the key and has rendered v1 but not stored it yet
        let lock = store.key_lock("default/tls");
        let guard = safe_write(&lock);
        let stale = store.materialize(&ObjectKey::new("default", "tls")).unwrap();

        writer.apply_watcher_event(&watcher::Event::Apply(tls_secret(&crt_v2, &key_v2)));
        thread::scope(|s| {
            let update = s.spawn(|| store.update_secret("default/tls"));
            thread::sleep(Duration::from_millis(50));
            assert!(!update.is_finished());

            safe_write(&store.certs).insert("default/tls".to_string(), stale);
            drop(guard);
            update.join().expect("Update should not panic");
        });

        let cert = store.certificate("default", "tls").unwrap();
        assert_eq!(cert.certificate.unwrap().common_name, "v2.example.com");
    }

    #[test]
    fn test_delete_waits_for_in_flight_lookup() {
        let (crt, key) = self_signed("example.com");
        let (_dir, store, mut writer) = store_with(vec![tls_secret(&crt, &key)]);

        let lock = store.key_lock("default/tls");
        let guard = safe_write(&lock);
        let stale = store.materialize(&ObjectKey::new("default", "tls")).unwrap();
        let path = stale.pem_file_name.clone().unwrap();

        writer.apply_watcher_event(&watcher::Event::Delete(secret("default", "tls", &[])));
        thread::scope(|s| {
            let delete = s.spawn(|| store.delete_secret("default/tls"));
            thread::sleep(Duration::from_millis(50));
            assert!(!delete.is_finished());

            safe_write(&store.certs).insert("default/tls".to_string(), stale);
            drop(guard);
            delete.join().expect("Delete should not panic");
        });

        assert!(!path.exists());
        assert_eq!(
            store.certificate("default", "tls").unwrap_err().kind(),
            crate::error::ErrorKind::NotFound
        );
    }
}
