//! geerpc Heartbeat Registry
//!
//! An in-memory server directory with TTL-based liveness, served over HTTP.
//! Servers POST their address periodically; cluster clients GET the live,
//! sorted list out of the `X-Geerpc-Servers` response header. Everything of
//! interest rides in headers; bodies stay empty.

pub mod heartbeat;
pub mod registry;

pub use heartbeat::start_heartbeat;
pub use registry::{Registry, DEFAULT_TIMEOUT};
