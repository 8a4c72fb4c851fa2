//! Secret material resolution
//!
//! Turns secret references found on cluster objects into material handles
//! (file name + content hash). Every lookup, successful or not, records one
//! tracking edge so a later change to the secret, including its creation,
//! invalidates the artifact that asked for it.

use crate::apis::metrics;
use crate::cache::listers::{self, Listers};
use crate::error::{CacheError, CacheResult};
use crate::resolver::cert_store::CertificateStore;
use crate::resolver::namespace::{NamespacePolicy, SecretRef};
use crate::resolver::tracker::Tracker;
use common::{
    CrtFile, File, ResourceKind, TrackingTarget, DH_PARAM_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
};
use std::sync::Arc;
use tracing::debug;

/// Resolves secret references to materialized files or raw content
pub struct SecretResolver {
    listers: Listers,
    cert_store: Arc<dyn CertificateStore>,
    tracker: Arc<dyn Tracker>,
    policy: NamespacePolicy,
}

impl SecretResolver {
    pub fn new(
        listers: Listers,
        cert_store: Arc<dyn CertificateStore>,
        tracker: Arc<dyn Tracker>,
        policy: NamespacePolicy,
    ) -> Self {
        Self {
            listers,
            cert_store,
            tracker,
            policy,
        }
    }

    /// Certificate + key bundle of a TLS secret
    pub fn tls_secret_path(
        &self,
        default_namespace: &str,
        reference: &str,
        target: &TrackingTarget,
    ) -> CacheResult<CrtFile> {
        self.tracked("tls", default_namespace, reference, target, |secret| {
            let cert = self.cert_store.certificate(&secret.namespace, &secret.name)?;
            match (cert.pem_file_name, cert.certificate) {
                (Some(filename), Some(info)) => Ok(CrtFile {
                    filename,
                    sha256_hash: cert.pem_sha,
                    common_name: info.common_name,
                    not_after: info.not_after,
                }),
                _ => Err(CacheError::MalformedData(format!(
                    "secret '{}' does not have keys '{}' and '{}'",
                    secret, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY
                ))),
            }
        })
    }

    /// CA bundle of a secret, plus its CRL when present
    ///
    /// Both handles carry the same hash, computed over CA and CRL together.
    pub fn ca_secret_path(
        &self,
        default_namespace: &str,
        reference: &str,
        target: &TrackingTarget,
    ) -> CacheResult<(File, Option<File>)> {
        self.tracked("ca", default_namespace, reference, target, |secret| {
            let cert = self.cert_store.certificate(&secret.namespace, &secret.name)?;
            let ca_file = cert.ca_file_name.ok_or_else(|| {
                CacheError::MalformedData(format!(
                    "secret '{}' does not have key '{}'",
                    secret,
                    common::CA_CERT_KEY
                ))
            })?;
            let crl = cert.crl_file_name.map(|filename| File {
                filename,
                sha256_hash: cert.pem_sha.clone(),
            });
            Ok((
                File {
                    filename: ca_file,
                    sha256_hash: cert.pem_sha,
                },
                crl,
            ))
        })
    }

    /// DH parameters of a secret, written to `<namespace>_<name>.pem`
    pub fn dh_secret_path(
        &self,
        default_namespace: &str,
        reference: &str,
        target: &TrackingTarget,
    ) -> CacheResult<File> {
        self.tracked("dh", default_namespace, reference, target, |secret| {
            let content = self.secret_key(secret, DH_PARAM_KEY)?;
            let file_name = format!("{}_{}", secret.namespace, secret.name);
            self.cert_store
                .add_or_update_dh_param(&file_name, &content)
                .map_err(|e| match e {
                    CacheError::MalformedData(reason) => CacheError::MalformedData(format!(
                        "error creating dh-param file '{}': {}",
                        file_name, reason
                    )),
                    other => other,
                })
        })
    }

    /// Raw content of one key of a secret
    pub fn secret_content(
        &self,
        default_namespace: &str,
        reference: &str,
        key: &str,
        target: &TrackingTarget,
    ) -> CacheResult<Vec<u8>> {
        self.tracked("content", default_namespace, reference, target, |secret| {
            self.secret_key(secret, key)
        })
    }

    fn secret_key(&self, secret: &SecretRef, key: &str) -> CacheResult<Vec<u8>> {
        let object = listers::get(&self.listers.secrets, &secret.namespace, &secret.name)
            .ok_or_else(|| CacheError::not_found(ResourceKind::Secret, secret))?;
        object
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|value| value.0.clone())
            .ok_or_else(|| {
                CacheError::MalformedData(format!(
                    "secret '{}' does not have key '{}'",
                    secret, key
                ))
            })
    }

    /// Resolve `reference` through the policy, run `lookup`, and record
    /// exactly one tracking edge for the outcome
    ///
    /// References the policy rejects are tracked under the raw reference.
    fn tracked<T>(
        &self,
        lookup: &str,
        default_namespace: &str,
        reference: &str,
        target: &TrackingTarget,
        resolve: impl FnOnce(&SecretRef) -> CacheResult<T>,
    ) -> CacheResult<T> {
        let (identity, result) = match self.policy.resolve(default_namespace, reference) {
            Ok(secret) => (secret.to_string(), resolve(&secret)),
            Err(e) => (reference.to_string(), Err(e)),
        };

        let missing = result.is_err();
        self.tracker
            .track(missing, target, ResourceKind::Secret, &identity);
        metrics::record_resolver_lookup(lookup, !missing);
        if let Err(e) = &result {
            debug!(lookup, secret = %identity, %target, "Secret lookup failed: {}", e);
        }
        result
    }
}
