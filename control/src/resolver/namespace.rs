//! Cross-namespace secret access policy

use crate::error::{CacheError, CacheResult};
use common::ObjectKey;
use std::fmt;

/// Secret reference resolved to its namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Decides which namespace a secret reference may be read from
///
/// Objects may only read secrets of their own namespace unless
/// `allow_cross_namespace` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespacePolicy {
    pub allow_cross_namespace: bool,
}

impl NamespacePolicy {
    pub fn new(allow_cross_namespace: bool) -> Self {
        Self {
            allow_cross_namespace,
        }
    }

    /// Resolve `reference` (`name` or `namespace/name`) on behalf of an
    /// object living in `default_namespace`
    ///
    /// An empty `default_namespace` marks a controller-level reference,
    /// which is never restricted.
    pub fn resolve(&self, default_namespace: &str, reference: &str) -> CacheResult<SecretRef> {
        let key = ObjectKey::parse(reference)?;

        let namespace = if default_namespace.is_empty() {
            key.namespace
        } else if key.namespace.is_empty() {
            default_namespace.to_string()
        } else if self.allow_cross_namespace || key.namespace == default_namespace {
            key.namespace
        } else {
            return Err(CacheError::PolicyDenied {
                reference: reference.to_string(),
                namespace: default_namespace.to_string(),
                target: key.namespace,
            });
        };

        Ok(SecretRef {
            namespace,
            name: key.name,
        })
    }
}
