//! geerpc Server
//!
//! This crate provides the server side of the geerpc RPC system: the typed
//! method registry, the connection machinery, and the server end of the HTTP
//! CONNECT bridge.
//!
//! # Overview
//!
//! A [`Server`] owns a set of named [`Service`]s. Each accepted connection
//! performs the options handshake, then runs one reader task that decodes
//! request frames sequentially and hands each request to its own worker task.
//! Workers execute handlers on the blocking pool (optionally bounded by the
//! handshake's handle timeout) and serialize their responses through a
//! per-connection write lock, so response frames never interleave.
//!
//! # Example
//!
//! ```no_run
//! use geerpc_server::{Server, Service};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { num1: i32, num2: i32 }
//!
//! # #[tokio::main]
//! # async fn main() -> geerpc_common::Result<()> {
//! let server = Server::new();
//! server.register(Service::new("Arith").method("Sum", |args: Args, reply: &mut i32| {
//!     *reply = args.num1 + args.num2;
//!     Ok(())
//! }))?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9999").await?;
//! server.accept(listener).await;
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod server;
pub mod service;

pub use server::Server;
pub use service::Service;
