use thiserror::Error;

/// Convenience alias used across the geerpc crates.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Every failure the framework reports.
///
/// The enum is `Clone`: when a client connection dies, the one terminating
/// error is delivered to every call still waiting on that connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Handshake rejected: bad magic number, unknown codec identifier, or a
    /// malformed options record.
    #[error("rpc: handshake failed: {0}")]
    Handshake(String),

    /// Read or write failure on the underlying byte stream.
    #[error("rpc: transport error: {0}")]
    Transport(String),

    /// Header or body bytes could not be encoded or decoded.
    #[error("rpc: codec error: {0}")]
    Codec(String),

    /// The request named a service or method the server does not know.
    #[error("rpc server: can't find {0}")]
    UnknownMethod(String),

    /// Failure text carried in a response header: a handler error, a lookup
    /// failure, or a server-side timeout. The connection itself is healthy.
    #[error("{0}")]
    Remote(String),

    /// A connect, call, or handler deadline fired. The message names which.
    #[error("{0}")]
    Timeout(String),

    /// The caller dropped out of an in-flight call.
    #[error("rpc client: call canceled")]
    Canceled,

    /// The client is closing or the connection has been terminated.
    #[error("rpc client: connection is shut down")]
    Shutdown,

    /// Discovery produced no live server addresses.
    #[error("rpc discovery: no available servers")]
    DiscoveryEmpty,

    /// A service with this name is already registered.
    #[error("rpc server: service already defined: {0}")]
    DuplicateRegistration(String),

    /// A cluster address did not match the `protocol@address` format.
    #[error("rpc client: wrong address format '{0}', expect protocol@addr")]
    BadAddress(String),
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Codec(err.to_string())
    }
}

impl From<postcard::Error> for RpcError {
    fn from(err: postcard::Error) -> Self {
        RpcError::Codec(err.to_string())
    }
}
