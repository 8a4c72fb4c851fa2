//! Common Types
//!
//! Value types shared between the change cache, the secret resolver and the
//! rendering pipeline that consumes them. Everything here is plain data:
//! no locks, no Kubernetes client, no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Secret key holding a PEM certificate chain
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Secret key holding a PEM private key
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// Secret key holding a PEM CA bundle
pub const CA_CERT_KEY: &str = "ca.crt";

/// Secret key holding a PEM certificate revocation list
pub const CA_CRL_KEY: &str = "ca.crl";

/// Secret key holding Diffie-Hellman parameters
pub const DH_PARAM_KEY: &str = "dhparam.pem";

/// Secret type for TLS secrets
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

// =============================================================================
// ResourceKind
// =============================================================================

/// Cluster object kinds the cache aggregates and tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Ingress,
    Service,
    Endpoints,
    Secret,
    ConfigMap,
    Pod,
}

impl ResourceKind {
    /// Lowercase name used in change descriptors and metric labels
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Ingress => "ingress",
            ResourceKind::Service => "service",
            ResourceKind::Endpoints => "endpoint",
            ResourceKind::Secret => "secret",
            ResourceKind::ConfigMap => "configmap",
            ResourceKind::Pod => "pod",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ObjectKey
// =============================================================================

/// Error splitting a `namespace/name` key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected key format: {0:?}")]
pub struct KeyError(pub String);

/// Identity of a namespaced cluster object: (namespace, name)
///
/// The namespace is empty for keys written without one (`"name"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    #[inline]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Split a `namespace/name` or `name` key
    ///
    /// More than one `/` is rejected, as is an empty name.
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let mut parts = key.split('/');
        let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => ("", name),
            (Some(namespace), Some(name), None) => (namespace, name),
            _ => return Err(KeyError(key.to_string())),
        };
        if name.is_empty() {
            return Err(KeyError(key.to_string()));
        }
        Ok(Self::new(namespace, name))
    }

    /// Parse `key`, qualifying it with `namespace` when it has none
    pub fn parse_in(key: &str, namespace: &str) -> Result<Self, KeyError> {
        let mut parsed = Self::parse(key)?;
        if parsed.namespace.is_empty() {
            parsed.namespace = namespace.to_string();
        }
        Ok(parsed)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

// =============================================================================
// TrackingTarget
// =============================================================================

/// Generated artifact that depends on one or more cluster objects
///
/// The rendering pipeline passes one of these to every tracked lookup, so a
/// later change to the looked-up object can invalidate exactly the artifacts
/// built from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingTarget {
    /// A frontend hostname (certificates, CA bundles, DH params)
    Hostname(String),
    /// A backend, identified by `namespace/service:port`
    Backend(String),
    /// A basic-auth userlist
    Userlist(String),
    /// Global configuration
    Global,
}

impl fmt::Display for TrackingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingTarget::Hostname(host) => write!(f, "hostname:{}", host),
            TrackingTarget::Backend(backend) => write!(f, "backend:{}", backend),
            TrackingTarget::Userlist(userlist) => write!(f, "userlist:{}", userlist),
            TrackingTarget::Global => f.write_str("global"),
        }
    }
}

// =============================================================================
// Material handles
// =============================================================================

/// A materialized file: path plus content hash
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub filename: PathBuf,
    /// Lowercase hex SHA-256 of the materialized content
    pub sha256_hash: String,
}

/// A materialized certificate + key bundle with parsed metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrtFile {
    pub filename: PathBuf,
    pub sha256_hash: String,
    /// Subject common name of the leaf certificate
    pub common_name: String,
    /// Leaf certificate expiry
    pub not_after: DateTime<Utc>,
}
