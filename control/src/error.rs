use common::{KeyError, ResourceKind};
use thiserror::Error;

/// Error taxonomy for cache lookups, secret resolution and ACME persistence
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: ResourceKind, key: String },

    #[error(
        "trying to read secret '{reference}' from namespace '{namespace}', but cross-namespace \
         reading of namespace '{target}' is disabled; use --allow-cross-namespace to enable"
    )]
    PolicyDenied {
        reference: String,
        namespace: String,
        target: String,
    },

    #[error("{0}")]
    MalformedData(String),

    #[error("transient cluster API failure: {0}")]
    Transient(#[source] kube::Error),

    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`CacheError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PolicyDenied,
    MalformedData,
    Transient,
    Internal,
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::NotFound { .. } => ErrorKind::NotFound,
            CacheError::PolicyDenied { .. } => ErrorKind::PolicyDenied,
            CacheError::MalformedData(_) | CacheError::InvalidKey(_) => ErrorKind::MalformedData,
            CacheError::Transient(_) => ErrorKind::Transient,
            CacheError::KeyGeneration(_) | CacheError::Io(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_found(kind: ResourceKind, key: impl ToString) -> Self {
        CacheError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Map a cluster API error: 404 becomes `NotFound`, everything else is
    /// left to the caller's resync loop as `Transient`
    pub(crate) fn from_kube(error: kube::Error, kind: ResourceKind, key: impl ToString) -> Self {
        match &error {
            kube::Error::Api(response) if response.code == 404 => Self::not_found(kind, key),
            _ => CacheError::Transient(error),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
