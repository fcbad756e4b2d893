//! Wire-level constants and record shapes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sentinel carried in every handshake record; a connection whose first
/// record does not carry it is not speaking this protocol and is closed.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Path the HTTP CONNECT bridge answers on.
pub const DEFAULT_RPC_PATH: &str = "/_geerpc_";

/// Path the heartbeat registry serves.
pub const DEFAULT_REGISTRY_PATH: &str = "/_geerpc_/registry";

/// Response header carrying the comma-joined live server list on registry GETs.
pub const SERVERS_HEADER: &str = "X-Geerpc-Servers";

/// Request header carrying the heartbeating server's address on registry POSTs.
pub const SERVER_HEADER: &str = "X-Geerpc-Server";

/// Status line both ends of the CONNECT bridge agree on.
pub const CONNECTED_STATUS: &str = "HTTP/1.0 200 Connected to Gee RPC";

/// Default bound on dial plus handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Body serialization formats a connection can negotiate.
///
/// The serde identifiers are the wire strings; an options record naming an
/// unknown identifier fails to decode, which is the handshake-reject path.
/// The `application/gob` identifier predates this implementation and is kept
/// for wire continuity; bodies under it are encoded with postcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecType {
    #[serde(rename = "application/gob")]
    Gob,
    #[serde(rename = "application/json")]
    Json,
}

/// Per-frame metadata, encoded identically in both directions.
///
/// `error` is empty on requests and on successful responses; a failed
/// response carries the failure text here and a placeholder body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Dotted `Service.Method` name.
    pub service_method: String,
    /// Sequence number tying a response back to its request. A client never
    /// assigns 0; it is the "no call" sentinel.
    pub seq: u64,
    pub error: String,
}

/// Connection-level handshake record, always encoded as JSON so the peer can
/// decode it before any codec has been negotiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub magic_number: u32,
    /// Encoding for every header and body that follows the handshake.
    pub codec_type: CodecType,
    /// Bound on dial plus handshake; zero means unlimited.
    pub connect_timeout: Duration,
    /// Server-side bound on one handler execution; zero means unlimited.
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecType::Gob,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    /// Stamps the protocol magic over whatever the caller set. The dial path
    /// always sends a normalized record, enforcing protocol identity.
    pub fn normalized(mut self) -> Self {
        self.magic_number = MAGIC_NUMBER;
        self
    }
}
