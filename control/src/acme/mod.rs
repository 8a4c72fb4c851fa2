//! ACME persistence
//!
//! The ACME client, the HTTP-01 challenge server and the certificate signer
//! keep their state in cluster objects:
//!
//! | state                 | object                                           |
//! |-----------------------|--------------------------------------------------|
//! | account key           | Secret, `tls.key` = PKCS#1 RSA PEM               |
//! | issued certificates   | `kubernetes.io/tls` Secret per certificate       |
//! | challenge tokens      | ConfigMap, `<domain>` = `<uri>=<token>`          |
//!
//! The protocol itself lives elsewhere; this module only implements the
//! resolver seams it consumes.

mod resolver;

pub use resolver::AcmeResolver;

use crate::error::CacheResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;

/// Certificate and key read back from a TLS secret
#[derive(Debug, Clone)]
pub struct AcmeCertificate {
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub not_after: DateTime<Utc>,
    pub key: RsaPrivateKey,
}

/// Account key and token storage used by the ACME client
#[async_trait]
pub trait ClientResolver: Send + Sync {
    /// Account key, generated and persisted on first use
    async fn account_key(&self) -> CacheResult<RsaPrivateKey>;

    /// Store the challenge token of a domain; an empty token removes it
    async fn set_token(&self, domain: &str, uri: &str, token: &str) -> CacheResult<()>;
}

/// Token lookup used by the challenge server
pub trait ServerResolver: Send + Sync {
    /// Token for `domain` if stored under `uri`, empty otherwise
    fn token(&self, domain: &str, uri: &str) -> String;
}

/// Certificate storage used by the signer
#[async_trait]
pub trait SignerResolver: Send + Sync {
    fn tls_secret_content(&self, secret_name: &str) -> CacheResult<AcmeCertificate>;

    async fn set_tls_secret_content(
        &self,
        secret_name: &str,
        pem_crt: &[u8],
        pem_key: &[u8],
    ) -> CacheResult<()>;
}
