use super::{AcmeCertificate, ClientResolver, ServerResolver, SignerResolver};
use crate::apis::metrics;
use crate::cache::lookup::ResourceCache;
use crate::config::ControllerConfig;
use crate::error::{CacheError, CacheResult};
use crate::resolver::cert_store::parse_certificate_der;
use async_trait::async_trait;
use common::{KeyError, ObjectKey, SECRET_TYPE_TLS, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const ACCOUNT_KEY_BITS: usize = 2048;

/// ACME resolvers backed by the resource cache
pub struct AcmeResolver {
    cache: Arc<ResourceCache>,
    secret_key: ObjectKey,
    token_config_map: ObjectKey,
    namespace: String,
}

impl AcmeResolver {
    /// `namespace` qualifies certificate secret names given without one
    pub fn new(
        cache: Arc<ResourceCache>,
        secret_key: ObjectKey,
        token_config_map: ObjectKey,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            secret_key,
            token_config_map,
            namespace: namespace.into(),
        }
    }

    pub fn from_config(cache: Arc<ResourceCache>, config: &ControllerConfig) -> Result<Self, KeyError> {
        Ok(Self::new(
            cache,
            config.acme_secret_key()?,
            config.acme_token_config_map()?,
            config.acme_namespace(),
        ))
    }

    fn load_account_key(&self) -> CacheResult<RsaPrivateKey> {
        let secret = self.cache.secret(&self.secret_key.to_string())?;
        let pem_key = secret_data(&secret, TLS_PRIVATE_KEY_KEY).ok_or_else(|| {
            CacheError::MalformedData(format!("secret '{}' does not have a key", self.secret_key))
        })?;
        let block = pem::parse(pem_key).map_err(|_| {
            CacheError::MalformedData(format!(
                "secret '{}' has not a valid pem encoded private key",
                self.secret_key
            ))
        })?;
        RsaPrivateKey::from_pkcs1_der(block.contents()).map_err(|e| {
            CacheError::MalformedData(format!("error parsing acme client private key: {}", e))
        })
    }

    async fn generate_account_key(&self) -> CacheResult<RsaPrivateKey> {
        let key = tokio::task::spawn_blocking(|| {
            RsaPrivateKey::new(&mut rand::thread_rng(), ACCOUNT_KEY_BITS)
        })
        .await
        .map_err(|e| CacheError::KeyGeneration(e.to_string()))?
        .map_err(|e| CacheError::KeyGeneration(e.to_string()))?;

        let pem_key = key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CacheError::KeyGeneration(e.to_string()))?;

        let secret = Secret {
            metadata: object_meta(&self.secret_key),
            data: Some(BTreeMap::from([(
                TLS_PRIVATE_KEY_KEY.to_string(),
                ByteString(pem_key.as_bytes().to_vec()),
            )])),
            ..Default::default()
        };
        self.cache.create_or_update_secret(secret).await?;

        metrics::record_acme_key_generated();
        info!(secret = %self.secret_key, "Generated ACME account key");
        Ok(key)
    }

    fn tls_secret_key(&self, secret_name: &str) -> CacheResult<ObjectKey> {
        Ok(ObjectKey::parse_in(secret_name, &self.namespace)?)
    }
}

#[async_trait]
impl ClientResolver for AcmeResolver {
    async fn account_key(&self) -> CacheResult<RsaPrivateKey> {
        match self.load_account_key() {
            Ok(key) => Ok(key),
            Err(e) => {
                if e.kind() != crate::error::ErrorKind::NotFound {
                    warn!("Replacing unusable ACME account key: {}", e);
                }
                self.generate_account_key().await
            }
        }
    }

    async fn set_token(&self, domain: &str, uri: &str, token: &str) -> CacheResult<()> {
        let mut config_map = match self.cache.config_map(&self.token_config_map.to_string()) {
            Ok(existing) => existing.as_ref().clone(),
            Err(_) => ConfigMap {
                metadata: object_meta(&self.token_config_map),
                ..Default::default()
            },
        };

        let data = config_map.data.get_or_insert_with(BTreeMap::new);
        if token.is_empty() {
            data.remove(domain);
        } else {
            data.insert(domain.to_string(), format!("{}={}", uri, token));
        }
        self.cache.create_or_update_config_map(config_map).await
    }
}

impl ServerResolver for AcmeResolver {
    fn token(&self, domain: &str, uri: &str) -> String {
        let Ok(config_map) = self.cache.config_map(&self.token_config_map.to_string()) else {
            return String::new();
        };
        config_map
            .data
            .as_ref()
            .and_then(|data| data.get(domain))
            .and_then(|entry| entry.strip_prefix(uri))
            .and_then(|rest| rest.strip_prefix('='))
            .map(str::to_string)
            .unwrap_or_default()
    }
}

#[async_trait]
impl SignerResolver for AcmeResolver {
    fn tls_secret_content(&self, secret_name: &str) -> CacheResult<AcmeCertificate> {
        let key = self.tls_secret_key(secret_name)?;
        let secret = self.cache.secret(&key.to_string())?;

        let pem_crt = secret_data(&secret, TLS_CERT_KEY).ok_or_else(|| {
            CacheError::MalformedData(format!(
                "secret {} does not have {} key",
                secret_name, TLS_CERT_KEY
            ))
        })?;
        let pem_key = secret_data(&secret, TLS_PRIVATE_KEY_KEY).ok_or_else(|| {
            CacheError::MalformedData(format!(
                "secret {} does not have {} key",
                secret_name, TLS_PRIVATE_KEY_KEY
            ))
        })?;

        let der_crt = pem::parse(pem_crt).map_err(|_| {
            CacheError::MalformedData(format!(
                "error decoding crt of secret {}: cannot find a proper pem block",
                secret_name
            ))
        })?;
        let der_key = pem::parse(pem_key).map_err(|_| {
            CacheError::MalformedData(format!(
                "error decoding key of secret {}: cannot find a proper pem block",
                secret_name
            ))
        })?;

        let crt = parse_certificate_der(der_crt.contents()).map_err(|e| {
            CacheError::MalformedData(format!("error parsing crt of secret {}: {}", secret_name, e))
        })?;
        let key = RsaPrivateKey::from_pkcs1_der(der_key.contents()).map_err(|e| {
            CacheError::MalformedData(format!("error parsing key of secret {}: {}", secret_name, e))
        })?;

        Ok(AcmeCertificate {
            common_name: crt.common_name,
            dns_names: crt.dns_names,
            not_after: crt.not_after,
            key,
        })
    }

    async fn set_tls_secret_content(
        &self,
        secret_name: &str,
        pem_crt: &[u8],
        pem_key: &[u8],
    ) -> CacheResult<()> {
        let key = self.tls_secret_key(secret_name)?;
        let secret = Secret {
            metadata: object_meta(&key),
            type_: Some(SECRET_TYPE_TLS.to_string()),
            data: Some(BTreeMap::from([
                (TLS_CERT_KEY.to_string(), ByteString(pem_crt.to_vec())),
                (TLS_PRIVATE_KEY_KEY.to_string(), ByteString(pem_key.to_vec())),
            ])),
            ..Default::default()
        };
        self.cache.create_or_update_secret(secret).await
    }
}

fn secret_data<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.0.as_slice())
}

fn object_meta(key: &ObjectKey) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(key.namespace.clone()),
        name: Some(key.name.clone()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::ingress::IngressClassFilter;
    use crate::cache::listers::{listers, ListerWriters};
    use crate::cache::testing::{config_map, secret, self_signed, FakeCluster, RecordingTracker};
    use crate::error::ErrorKind;

    struct Fixture {
        acme: AcmeResolver,
        cluster: Arc<FakeCluster>,
    }

    fn fixture() -> Fixture {
        let (listers, writers) = listers(false);
        let ListerWriters {
            secrets,
            config_maps,
            ..
        } = writers;
        let cluster = Arc::new(FakeCluster::new(secrets, config_maps));
        let cache = Arc::new(ResourceCache::new(
            listers,
            cluster.clone(),
            Arc::new(RecordingTracker::default()),
            IngressClassFilter::new("haul", false),
        ));
        let config = ControllerConfig {
            pod_namespace: Some("ingress".to_string()),
            ..ControllerConfig::default()
        };
        let acme = AcmeResolver::from_config(cache, &config).expect("Should qualify ACME names");
        assert_eq!(acme.secret_key, ObjectKey::new("ingress", "acme-private-key"));
        Fixture { acme, cluster }
    }

    fn tokens(pairs: &[(&str, &str)]) -> ConfigMap {
        let data: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config_map("ingress", "acme-validation-tokens", &data)
    }

    fn rsa_pem() -> String {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        key.to_pkcs1_pem(LineEnding::LF).unwrap().to_string()
    }

    #[test]
    fn test_token_lookup() {
        let f = fixture();
        f.cluster
            .seed_config_map(tokens(&[("example.com", "abc=xyz")]));

        assert_eq!(f.acme.token("example.com", "abc"), "xyz");
        assert_eq!(f.acme.token("example.com", "wrong"), "");
        assert_eq!(f.acme.token("example.com", "ab"), "");
        assert_eq!(f.acme.token("other.com", "abc"), "");
    }

    #[test]
    fn test_token_without_config_map_is_empty() {
        let f = fixture();
        assert_eq!(f.acme.token("example.com", "abc"), "");
    }

    #[tokio::test]
    async fn test_set_token_creates_then_updates() {
        let f = fixture();
        f.acme.set_token("example.com", "abc", "xyz").await.unwrap();
        assert_eq!(f.acme.token("example.com", "abc"), "xyz");
        assert_eq!(f.cluster.creates(), 1);

        f.acme.set_token("other.com", "def", "uvw").await.unwrap();
        assert_eq!(f.cluster.updates(), 1);
        assert_eq!(f.acme.token("example.com", "abc"), "xyz");
        assert_eq!(f.acme.token("other.com", "def"), "uvw");
    }

    #[tokio::test]
    async fn test_empty_token_removes_entry() {
        let f = fixture();
        f.cluster.seed_config_map(tokens(&[
            ("example.com", "abc=xyz"),
            ("other.com", "def=uvw"),
        ]));

        f.acme.set_token("example.com", "abc", "").await.unwrap();

        let stored = f
            .acme
            .cache
            .config_map("ingress/acme-validation-tokens")
            .unwrap();
        let data = stored.data.as_ref().unwrap();
        assert!(!data.contains_key("example.com"));
        assert_eq!(data.get("other.com").map(String::as_str), Some("def=uvw"));
    }

    #[tokio::test]
    async fn test_account_key_is_generated_once() {
        let f = fixture();

        let first = f.acme.account_key().await.expect("Should generate key");
        assert_eq!(f.cluster.creates(), 1);

        let second = f.acme.account_key().await.expect("Should load key");
        assert_eq!(f.cluster.creates(), 1);
        assert_eq!(f.cluster.updates(), 0);
        assert_eq!(
            first.to_pkcs1_der().unwrap().as_bytes(),
            second.to_pkcs1_der().unwrap().as_bytes()
        );
    }

    #[tokio::test]
    async fn test_corrupt_account_key_is_replaced() {
        let f = fixture();
        f.cluster.seed_secret(secret(
            "ingress",
            "acme-private-key",
            &[(TLS_PRIVATE_KEY_KEY, b"garbage")],
        ));

        let key = f.acme.account_key().await.expect("Should regenerate key");
        assert_eq!(f.cluster.updates(), 1);

        let reloaded = f.acme.account_key().await.unwrap();
        assert_eq!(key, reloaded);
    }

    #[tokio::test]
    async fn test_tls_secret_round_trip() {
        let f = fixture();
        let (crt, _) = self_signed("example.com");
        let key = rsa_pem();

        f.acme
            .set_tls_secret_content("example-tls", crt.as_bytes(), key.as_bytes())
            .await
            .unwrap();

        let stored = f.acme.cache.secret("ingress/example-tls").unwrap();
        assert_eq!(stored.type_.as_deref(), Some(SECRET_TYPE_TLS));

        let content = f.acme.tls_secret_content("example-tls").unwrap();
        assert_eq!(content.common_name, "example.com");
        assert_eq!(content.dns_names, vec!["example.com".to_string()]);
    }

    #[test]
    fn test_tls_secret_content_errors() {
        let f = fixture();
        let (crt, _) = self_signed("example.com");
        let key = rsa_pem();
        let cases: Vec<(&str, Vec<(&str, &[u8])>, &str)> = vec![
            ("no-crt", vec![(TLS_PRIVATE_KEY_KEY, key.as_bytes())], "does not have tls.crt key"),
            ("no-key", vec![(TLS_CERT_KEY, crt.as_bytes())], "does not have tls.key key"),
            (
                "bad-crt-pem",
                vec![(TLS_CERT_KEY, &b"junk"[..]), (TLS_PRIVATE_KEY_KEY, key.as_bytes())],
                "error decoding crt",
            ),
            (
                "bad-key-pem",
                vec![(TLS_CERT_KEY, crt.as_bytes()), (TLS_PRIVATE_KEY_KEY, &b"junk"[..])],
                "error decoding key",
            ),
            (
                "bad-crt",
                vec![
                    (TLS_CERT_KEY, key.as_bytes()),
                    (TLS_PRIVATE_KEY_KEY, key.as_bytes()),
                ],
                "error parsing crt",
            ),
            (
                "bad-key",
                vec![(TLS_CERT_KEY, crt.as_bytes()), (TLS_PRIVATE_KEY_KEY, crt.as_bytes())],
                "error parsing key",
            ),
        ];

        for (name, data, expected) in cases {
            f.cluster.seed_secret(secret("ingress", name, &data));
            let err = f.acme.tls_secret_content(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedData, "{}", name);
            assert!(
                err.to_string().contains(expected),
                "{}: unexpected error '{}'",
                name,
                err
            );
        }

        assert_eq!(
            f.acme.tls_secret_content("missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
