//! Controller metrics
//!
//! Counters for the change cache, the secret resolver and ACME persistence.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::convert::Infallible;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROLLER_METRICS_REGISTRY: Registry = Registry::new();

    /// Watch events ingested by the change aggregator
    static ref CACHE_EVENTS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "haul_cache_events_total",
            "Total number of watch events ingested by the change cache",
        );
        let counter = IntCounterVec::new(opts, &["kind", "action"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Change snapshots published
    static ref CACHE_PUBLISHES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "haul_cache_publishes_total",
            "Total number of change snapshots published",
        );
        let counter = IntCounterVec::new(opts, &["sync"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Changed objects handed over by publishes
    static ref CACHE_PUBLISHED_CHANGES_TOTAL: IntCounter = {
        let counter = IntCounter::new(
            "haul_cache_published_changes_total",
            "Total number of change descriptors published",
        )
        .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Secret resolver lookups
    static ref RESOLVER_LOOKUPS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "haul_resolver_lookups_total",
            "Total number of secret material lookups",
        );
        let counter = IntCounterVec::new(opts, &["lookup", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// ACME account keys generated (first start or corrupt key material)
    static ref ACME_KEYS_GENERATED_TOTAL: IntCounter = {
        let counter = IntCounter::new(
            "haul_acme_account_keys_generated_total",
            "Total number of ACME account keys generated",
        )
        .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };
}

/// Record one ingested watch event
pub fn record_cache_event(kind: &str, action: &str) {
    CACHE_EVENTS_TOTAL.with_label_values(&[kind, action]).inc();
}

/// Record one publish and the number of descriptors it carried
pub fn record_publish(changes: usize, full_sync: bool) {
    let sync = if full_sync { "full" } else { "partial" };
    CACHE_PUBLISHES_TOTAL.with_label_values(&[sync]).inc();
    CACHE_PUBLISHED_CHANGES_TOTAL.inc_by(changes as u64);
}

/// Record one secret resolver lookup
pub fn record_resolver_lookup(lookup: &str, found: bool) {
    let result = if found { "found" } else { "missing" };
    RESOLVER_LOOKUPS_TOTAL
        .with_label_values(&[lookup, result])
        .inc();
}

/// Record one generated ACME account key
pub fn record_acme_key_generated() {
    ACME_KEYS_GENERATED_TOTAL.inc();
}

/// Gather controller metrics
pub fn gather_controller_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROLLER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}

/// Serve `GET /metrics` until the task is aborted
pub async fn serve_metrics(bind_addr: &str) -> Result<(), String> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", bind_addr, e))?;
    info!("Metrics endpoint listening on {}", bind_addr);

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Accept error on {}: {}", bind_addr, e);
                continue;
            }
        };
        debug!("Accepted metrics connection from {}", peer_addr);

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                Ok::<_, Infallible>(metrics_response(req.method(), req.uri().path()))
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Connection error: {}", e);
            }
        });
    }
}

fn metrics_response(method: &Method, path: &str) -> Response<Full<Bytes>> {
    let (status, body) = if path != "/metrics" || method != Method::GET {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else {
        match gather_controller_metrics() {
            Ok(metrics) => (StatusCode::OK, metrics),
            Err(e) => {
                error!("{}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e)
            }
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
