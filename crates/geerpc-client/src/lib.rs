//! geerpc Client
//!
//! One [`Client`] owns one connection and multiplexes any number of
//! concurrent calls over it. Requests go out under a send lock, each tagged
//! with a fresh sequence number; a background reader task demultiplexes
//! response frames back to the callers waiting on them.
//!
//! # Usage
//!
//! ```no_run
//! use geerpc_client::Client;
//! use geerpc_common::Options;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { num1: i32, num2: i32 }
//!
//! # #[tokio::main]
//! # async fn main() -> geerpc_common::Result<()> {
//! let client = Client::dial("127.0.0.1:9999", Options::default()).await?;
//! let reply: i32 = client.call("Arith.Sum", &Args { num1: 3, num2: 4 }).await?;
//! assert_eq!(reply, 7);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Cloning a [`Client`] is cheap; clones share the connection and its
//! pending-call table. [`Client::go`] is the asynchronous surface,
//! [`Client::call`] the synchronous one, and
//! [`Client::call_with_cancel`] / [`Client::call_timeout`] add caller-side
//! cancellation.

pub mod client;
pub mod dial;

pub use client::{Call, Client};
