//! Secret and certificate resolution
//!
//! - [`namespace`]: which namespace a secret reference may be read from
//! - [`secrets`]: reference → material handle, tracked per lookup
//! - [`cert_store`]: materialization of secret content as files
//! - [`tracker`]: artifact → source object dependency edges

pub mod cert_store;
pub mod namespace;
pub mod secrets;
pub mod tracker;

pub use cert_store::{CertificateInfo, CertificateStore, LocalCertificateStore, SslCert};
pub use namespace::{NamespacePolicy, SecretRef};
pub use secrets::SecretResolver;
pub use tracker::{DependencyTracker, Edge, Tracker};
