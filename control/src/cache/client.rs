//! Cluster API writes
//!
//! The cache reads through listers; the few writes it performs (ACME key and
//! token persistence) and the controller pod existence check go straight to
//! the API server through [`ClusterClient`].

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use common::ResourceKind;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Create/update/get against the cluster API
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_secret(&self, secret: &Secret) -> CacheResult<()>;
    async fn update_secret(&self, secret: &Secret) -> CacheResult<()>;
    async fn create_config_map(&self, config_map: &ConfigMap) -> CacheResult<()>;
    async fn update_config_map(&self, config_map: &ConfigMap) -> CacheResult<()>;
    /// Fetch a pod directly, bypassing listers
    async fn pod(&self, namespace: &str, name: &str) -> CacheResult<Option<Pod>>;
}

/// [`ClusterClient`] over a `kube::Client`
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, secret: &Secret) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &secret.namespace().unwrap_or_default())
    }

    fn config_maps(&self, config_map: &ConfigMap) -> Api<ConfigMap> {
        Api::namespaced(
            self.client.clone(),
            &config_map.namespace().unwrap_or_default(),
        )
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_secret(&self, secret: &Secret) -> CacheResult<()> {
        let name = secret.name_any();
        debug!("Creating Secret {}/{}", secret.namespace().unwrap_or_default(), name);
        self.secrets(secret)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| CacheError::from_kube(e, ResourceKind::Secret, &name))?;
        Ok(())
    }

    async fn update_secret(&self, secret: &Secret) -> CacheResult<()> {
        let name = secret.name_any();
        debug!("Updating Secret {}/{}", secret.namespace().unwrap_or_default(), name);
        self.secrets(secret)
            .replace(&name, &PostParams::default(), secret)
            .await
            .map_err(|e| CacheError::from_kube(e, ResourceKind::Secret, &name))?;
        Ok(())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> CacheResult<()> {
        let name = config_map.name_any();
        debug!(
            "Creating ConfigMap {}/{}",
            config_map.namespace().unwrap_or_default(),
            name
        );
        self.config_maps(config_map)
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| CacheError::from_kube(e, ResourceKind::ConfigMap, &name))?;
        Ok(())
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> CacheResult<()> {
        let name = config_map.name_any();
        debug!(
            "Updating ConfigMap {}/{}",
            config_map.namespace().unwrap_or_default(),
            name
        );
        self.config_maps(config_map)
            .replace(&name, &PostParams::default(), config_map)
            .await
            .map_err(|e| CacheError::from_kube(e, ResourceKind::ConfigMap, &name))?;
        Ok(())
    }

    async fn pod(&self, namespace: &str, name: &str) -> CacheResult<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| CacheError::from_kube(e, ResourceKind::Pod, format!("{}/{}", namespace, name)))
    }
}
