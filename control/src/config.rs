//! Configuration for the ingress change cache
//!
//! Loaded from environment variables or a JSON file; every field has a default.

use common::{KeyError, ObjectKey};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Namespace used to qualify ACME object names when `POD_NAMESPACE` is unset
const FALLBACK_NAMESPACE: &str = "default";

/// Controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Ingress class handled by this controller
    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,

    /// Also handle ingresses that do not name any class
    #[serde(default)]
    pub watch_ingress_without_class: bool,

    /// Restrict watches to one namespace (default: all namespaces)
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// Allow secret references to read from other namespaces
    #[serde(default)]
    pub allow_cross_namespace: bool,

    /// Global configmap, as `namespace/name`
    #[serde(default)]
    pub global_config_map: Option<String>,

    /// TCP services configmap, as `namespace/name`
    #[serde(default)]
    pub tcp_config_map: Option<String>,

    /// Skip the pod watch (terminating-pod lookups become unavailable)
    #[serde(default)]
    pub disable_pod_list: bool,

    /// Directory where certificate material is materialized
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,

    /// Namespace the controller pod runs in
    #[serde(default)]
    pub pod_namespace: Option<String>,

    /// Name of the controller pod
    #[serde(default)]
    pub pod_name: Option<String>,

    /// Address of the `/metrics` endpoint; empty disables it
    #[serde(default = "default_metrics_bind_addr")]
    pub metrics_bind_addr: String,

    /// Change notification timing
    #[serde(default)]
    pub updates: UpdateConfig,

    /// ACME persistence
    #[serde(default)]
    pub acme: AcmeConfig,
}

/// Debounce and resync timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateConfig {
    /// Delay between the first change of a burst and the update signal (default: 200ms)
    #[serde(default = "default_wait_before_update")]
    pub wait_before_update_ms: u64,

    /// Interval of periodic publishes with no pending changes (default: 600s)
    #[serde(default = "default_resync_period")]
    pub resync_period_secs: u64,
}

fn default_wait_before_update() -> u64 {
    200
}

fn default_resync_period() -> u64 {
    600
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            wait_before_update_ms: default_wait_before_update(),
            resync_period_secs: default_resync_period(),
        }
    }
}

impl UpdateConfig {
    pub fn wait_before_update(&self) -> Duration {
        Duration::from_millis(self.wait_before_update_ms)
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }
}

/// ACME account key and challenge token storage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcmeConfig {
    /// Secret holding the account private key (`name` or `namespace/name`)
    #[serde(default = "default_acme_secret_key_name")]
    pub secret_key_name: String,

    /// ConfigMap holding HTTP-01 tokens (`name` or `namespace/name`)
    #[serde(default = "default_acme_token_config_map_name")]
    pub token_config_map_name: String,
}

fn default_acme_secret_key_name() -> String {
    "acme-private-key".to_string()
}

fn default_acme_token_config_map_name() -> String {
    "acme-validation-tokens".to_string()
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            secret_key_name: default_acme_secret_key_name(),
            token_config_map_name: default_acme_token_config_map_name(),
        }
    }
}

fn default_ingress_class() -> String {
    "haul".to_string()
}

fn default_metrics_bind_addr() -> String {
    "0.0.0.0:10254".to_string()
}

fn default_cert_dir() -> PathBuf {
    PathBuf::from("/var/lib/haul/ssl")
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ingress_class: default_ingress_class(),
            watch_ingress_without_class: false,
            watch_namespace: None,
            allow_cross_namespace: false,
            global_config_map: None,
            tcp_config_map: None,
            disable_pod_list: false,
            cert_dir: default_cert_dir(),
            pod_namespace: None,
            pod_name: None,
            metrics_bind_addr: default_metrics_bind_addr(),
            updates: UpdateConfig::default(),
            acme: AcmeConfig::default(),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|val| val.parse::<bool>().ok())
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a JSON document, then apply environment overrides
    pub fn from_json(json: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config: Self = serde_json::from_str(json)?;
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Ok(val) = env::var("HAUL_INGRESS_CLASS") {
            self.ingress_class = val;
        }
        if let Some(val) = env_flag("HAUL_WATCH_INGRESS_WITHOUT_CLASS") {
            self.watch_ingress_without_class = val;
        }
        if let Ok(val) = env::var("HAUL_WATCH_NAMESPACE") {
            self.watch_namespace = Some(val).filter(|ns| !ns.is_empty());
        }
        if let Some(val) = env_flag("HAUL_ALLOW_CROSS_NAMESPACE") {
            self.allow_cross_namespace = val;
        }
        if let Ok(val) = env::var("HAUL_CONFIGMAP") {
            self.global_config_map = Some(val);
        }
        if let Ok(val) = env::var("HAUL_TCP_SERVICES_CONFIGMAP") {
            self.tcp_config_map = Some(val);
        }
        if let Some(val) = env_flag("HAUL_DISABLE_POD_LIST") {
            self.disable_pod_list = val;
        }
        if let Ok(val) = env::var("HAUL_CERT_DIR") {
            self.cert_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("HAUL_METRICS_BIND_ADDR") {
            self.metrics_bind_addr = val;
        }
        if let Ok(val) = env::var("HAUL_WAIT_BEFORE_UPDATE_MS") {
            self.updates.wait_before_update_ms = val.parse()?;
        }
        if let Ok(val) = env::var("HAUL_RESYNC_PERIOD_SECS") {
            self.updates.resync_period_secs = val.parse()?;
        }
        if let Ok(val) = env::var("HAUL_ACME_SECRET_KEY_NAME") {
            self.acme.secret_key_name = val;
        }
        if let Ok(val) = env::var("HAUL_ACME_TOKEN_CONFIGMAP_NAME") {
            self.acme.token_config_map_name = val;
        }
        if let Ok(val) = env::var("POD_NAMESPACE") {
            self.pod_namespace = Some(val).filter(|ns| !ns.is_empty());
        }
        if let Ok(val) = env::var("POD_NAME") {
            self.pod_name = Some(val).filter(|name| !name.is_empty());
        }
        Ok(())
    }

    /// Namespace for ACME objects written without one
    pub fn acme_namespace(&self) -> &str {
        self.pod_namespace.as_deref().unwrap_or(FALLBACK_NAMESPACE)
    }

    /// Fully qualified ACME account key secret
    pub fn acme_secret_key(&self) -> Result<ObjectKey, KeyError> {
        ObjectKey::parse_in(&self.acme.secret_key_name, self.acme_namespace())
    }

    /// Fully qualified ACME token configmap
    pub fn acme_token_config_map(&self) -> Result<ObjectKey, KeyError> {
        ObjectKey::parse_in(&self.acme.token_config_map_name, self.acme_namespace())
    }
}
