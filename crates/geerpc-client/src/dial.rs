//! Dial helpers: plain TCP, unix sockets, and the HTTP CONNECT bridge.
//!
//! Dial and handshake together run under the options' connect timeout; a
//! timed-out attempt is abandoned wholesale and its half-made connection
//! dropped. Cluster code addresses servers as `protocol@address`
//! (`tcp@10.0.0.1:9999`, `unix@/tmp/rpc.sock`, `http@10.0.0.1:7001`), which
//! [`Client::dial_rpc_addr`] resolves to the right dialer.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use geerpc_common::{Options, Result, RpcError, CONNECTED_STATUS, DEFAULT_RPC_PATH};

use crate::client::Client;

impl Client {
    /// Dials a TCP endpoint and negotiates the connection.
    pub async fn dial(addr: &str, options: Options) -> Result<Client> {
        let connect_timeout = options.connect_timeout;
        with_connect_timeout(connect_timeout, async move {
            let stream = TcpStream::connect(addr).await?;
            Client::new(stream, options).await
        })
        .await
    }

    /// Dials through the HTTP CONNECT bridge, then proceeds with the normal
    /// handshake on the upgraded stream.
    pub async fn dial_http(addr: &str, options: Options) -> Result<Client> {
        let connect_timeout = options.connect_timeout;
        with_connect_timeout(connect_timeout, async move {
            let stream = TcpStream::connect(addr).await?;
            let mut stream = BufReader::new(stream);
            stream
                .write_all(format!("CONNECT {} HTTP/1.0\r\n\r\n", DEFAULT_RPC_PATH).as_bytes())
                .await?;

            let mut status_line = String::new();
            stream.read_line(&mut status_line).await?;
            if status_line.trim_end() != CONNECTED_STATUS {
                return Err(RpcError::Handshake(format!(
                    "unexpected HTTP response: {}",
                    status_line.trim_end()
                )));
            }
            // The blank line that terminates the response.
            let mut blank = String::new();
            stream.read_line(&mut blank).await?;

            Client::new(stream, options).await
        })
        .await
    }

    /// Dials a `protocol@address` cluster address.
    pub async fn dial_rpc_addr(rpc_addr: &str, options: Options) -> Result<Client> {
        let Some((protocol, addr)) = rpc_addr.split_once('@') else {
            return Err(RpcError::BadAddress(rpc_addr.to_string()));
        };
        match protocol {
            "http" => Client::dial_http(addr, options).await,
            "tcp" => Client::dial(addr, options).await,
            #[cfg(unix)]
            "unix" => {
                let connect_timeout = options.connect_timeout;
                let addr = addr.to_string();
                with_connect_timeout(connect_timeout, async move {
                    let stream = UnixStream::connect(&addr).await?;
                    Client::new(stream, options).await
                })
                .await
            }
            _ => Err(RpcError::BadAddress(rpc_addr.to_string())),
        }
    }
}

async fn with_connect_timeout<F>(timeout: Duration, dial: F) -> Result<Client>
where
    F: Future<Output = Result<Client>>,
{
    if timeout.is_zero() {
        return dial.await;
    }
    match tokio::time::timeout(timeout, dial).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(format!(
            "rpc client: connect timeout: expect within {:?}",
            timeout
        ))),
    }
}
