//! Haul ingress controller core
//!
//! Debounced change aggregation over watched cluster objects, secret and
//! certificate resolution with dependency tracking, and ACME persistence on
//! Secrets and ConfigMaps.

pub mod acme;
pub mod apis;
pub mod cache;
pub mod config;
pub mod error;
pub mod resolver;
