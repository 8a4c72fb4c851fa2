//! Kubernetes API integrations
//!
//! Watchers feeding the change cache, the ingress class policy, and the
//! controller metrics.

pub mod ingress;
pub mod metrics;
pub mod watchers;
