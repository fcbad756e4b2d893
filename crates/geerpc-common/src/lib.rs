//! geerpc Common Types and Codec Layer
//!
//! This crate provides the wire protocol definitions, the error type, and the
//! codec layer shared by every component of the geerpc RPC system.
//!
//! # Overview
//!
//! A geerpc connection starts with one self-describing handshake record (the
//! [`Options`](proto::Options)), followed by an interleaved stream of
//! header/body frames encoded with the codec the handshake negotiated:
//!
//! ```text
//! | Options (always JSON) | Header | Body | Header | Body | ...
//! |                       | <- encoding chosen by Options.codec_type -> |
//! ```
//!
//! Every record on the wire carries a 4-byte big-endian length prefix.
//!
//! # Components
//!
//! - [`error`] - The [`RpcError`](error::RpcError) enum and `Result` alias
//! - [`proto`] - Wire constants, [`Header`](proto::Header), [`Options`](proto::Options)
//! - [`codec`] - Frame readers/writers and the body serialization formats

pub mod codec;
pub mod error;
pub mod proto;

pub use error::{Result, RpcError};
pub use proto::{
    CodecType, Header, Options, CONNECTED_STATUS, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REGISTRY_PATH,
    DEFAULT_RPC_PATH, MAGIC_NUMBER, SERVERS_HEADER, SERVER_HEADER,
};
