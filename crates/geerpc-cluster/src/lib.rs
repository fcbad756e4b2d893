//! geerpc Cluster Client
//!
//! This crate composes a service-discovery source with a load-balancing
//! policy and a per-address connection cache.
//!
//! - [`Discovery`](discovery::Discovery) yields a snapshot of known server
//!   addresses and picks one per call: [`MultiServersDiscovery`] over a
//!   hand-maintained list, or [`RegistryDiscovery`] refreshing from a
//!   heartbeat registry.
//! - [`XClient`](xclient::XClient) provides unicast [`call`](xclient::XClient::call)
//!   and fan-out [`broadcast`](xclient::XClient::broadcast) over the
//!   discovered fleet, caching one connection per address.

pub mod discovery;
pub mod xclient;

pub use discovery::{Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode};
pub use xclient::XClient;
