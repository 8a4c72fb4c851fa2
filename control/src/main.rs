use anyhow::Result;
use common::ResourceKind;
use control::apis::ingress::IngressClassFilter;
use control::apis::{metrics, watchers};
use control::cache::event::object_key;
use control::cache::{
    listers, ChangeAggregator, ChangeSnapshot, EventSink, KubeClusterClient, ResourceCache,
    ResourceEvent, SignalQueue,
};
use control::config::ControllerConfig;
use control::resolver::{DependencyTracker, LocalCertificateStore};
use std::env;
use std::fs;
use std::sync::Arc;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn load_config() -> Result<ControllerConfig> {
    let config = match env::var("HAUL_CONFIG_FILE") {
        Ok(path) => {
            let json = fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;
            ControllerConfig::from_json(&json)
        }
        Err(_) => ControllerConfig::from_env(),
    };
    config.map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))
}

/// Haul ingress controller
///
/// Watches ingress-related objects, debounces their changes and publishes
/// change snapshots for the configuration pipeline.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = load_config()?;
    info!("🦀 Haul ingress controller (class '{}')", config.ingress_class);

    let client = kube::Client::try_default().await?;

    let (listers, writers) = listers::listers(!config.disable_pod_list);
    let cert_store = Arc::new(
        LocalCertificateStore::new(&config.cert_dir, listers.secrets.clone())
            .map_err(|e| anyhow::anyhow!("Failed to create certificate store: {}", e))?,
    );
    let tracker = Arc::new(DependencyTracker::new());
    let queue = Arc::new(SignalQueue::new());

    let aggregator = Arc::new(ChangeAggregator::new(
        config.global_config_map.clone(),
        config.tcp_config_map.clone(),
        config.updates.wait_before_update(),
        cert_store,
        queue.clone(),
        tokio::runtime::Handle::current(),
    ));

    let cache = Arc::new(
        ResourceCache::new(
            listers.clone(),
            Arc::new(KubeClusterClient::new(client.clone())),
            tracker.clone(),
            IngressClassFilter::new(config.ingress_class.clone(), config.watch_ingress_without_class),
        )
        .with_pod_identity(config.pod_namespace.clone(), config.pod_name.clone()),
    );

    let sink: Arc<dyn EventSink> = aggregator.clone();
    let mut tasks = watchers::spawn_watchers(&client, &config, &listers, writers, sink);

    if !config.metrics_bind_addr.is_empty() {
        let bind_addr = config.metrics_bind_addr.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = metrics::serve_metrics(&bind_addr).await {
                tracing::error!("Metrics endpoint error: {}", e);
            }
        }));
    }

    match cache.ingress_pod_name().await {
        Ok((namespace, name)) => info!("Running as pod {}/{}", namespace, name),
        Err(e) => warn!("Cannot identify controller pod: {}", e),
    }

    let mut resync = tokio::time::interval(config.updates.resync_period());
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    resync.tick().await;

    info!("Press Ctrl-C to exit.");

    loop {
        tokio::select! {
            _ = queue.wait() => {
                let snapshot = aggregator.publish();
                sync(&snapshot, &tracker);
            }
            _ = resync.tick() => {
                debug!("Periodic resync");
                aggregator.notify(ResourceEvent::Resync);
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    for task in tasks {
        task.abort();
    }

    Ok(())
}

/// Hand one snapshot to the configuration pipeline
fn sync(snapshot: &ChangeSnapshot, tracker: &DependencyTracker) {
    if snapshot.full_sync {
        info!(changes = snapshot.objects.len(), "Full configuration sync");
        return;
    }
    if snapshot.is_empty() {
        return;
    }

    for object in &snapshot.objects {
        debug!("Changed: {}", object);
    }

    let invalidated: usize = snapshot
        .secrets_del
        .iter()
        .chain(&snapshot.secrets_upd)
        .chain(&snapshot.secrets_add)
        .map(|secret| {
            tracker
                .targets_for(ResourceKind::Secret, &object_key(secret.as_ref()))
                .len()
        })
        .sum();

    info!(
        changes = snapshot.objects.len(),
        global = snapshot.global_changed(),
        tcp_services = snapshot.tcp_config_map_changed(),
        invalidated,
        "Partial configuration sync"
    );
}
