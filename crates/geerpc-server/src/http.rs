//! Server end of the HTTP CONNECT bridge.
//!
//! A client that can only reach the server over HTTP sends
//! `CONNECT /_geerpc_ HTTP/1.0` and, once the server answers with a 200
//! status line, the same TCP stream becomes a regular RPC connection. The
//! request is parsed line by line; whatever the buffered reader has consumed
//! beyond the blank line stays available because the buffered stream itself
//! is handed to the connection handler.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error};

use geerpc_common::{CONNECTED_STATUS, DEFAULT_RPC_PATH};

use crate::server::Server;

impl Server {
    /// Accept loop for the CONNECT bridge; the HTTP-side twin of
    /// [`Server::accept`].
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(error = %err, "rpc server: http accept error");
                    return;
                }
            };
            debug!(peer = %peer, "rpc server: http connection accepted");
            let server = Arc::clone(&self);
            tokio::spawn(async move { server.handle_http(stream).await });
        }
    }

    /// Performs the CONNECT upgrade on one connection, then hands the
    /// stream to the regular connection handler.
    pub async fn handle_http(self: Arc<Self>, stream: TcpStream) {
        let mut stream = BufReader::new(stream);

        let mut request_line = String::new();
        match stream.read_line(&mut request_line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        // Drain the request headers up to the blank line.
        loop {
            let mut line = String::new();
            match stream.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) if line == "\r\n" || line == "\n" => break,
                Ok(_) => {}
            }
        }

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");
        if method != "CONNECT" {
            let _ = stream
                .write_all(
                    b"HTTP/1.0 405 Method Not Allowed\r\nContent-Type: text/plain\r\n\r\n405 must CONNECT\n",
                )
                .await;
            return;
        }
        if path != DEFAULT_RPC_PATH {
            let _ = stream.write_all(b"HTTP/1.0 404 Not Found\r\n\r\n").await;
            return;
        }
        if stream
            .write_all(format!("{}\n\n", CONNECTED_STATUS).as_bytes())
            .await
            .is_err()
        {
            return;
        }
        self.serve_conn(stream).await;
    }
}
