//! Connection server: accept loop, handshake, request dispatch.
//!
//! Each connection gets exactly one reader, which keeps frame boundaries
//! intact, and one worker task per in-flight request. Responses funnel
//! through a per-connection write lock so header and body of one response
//! always land adjacently on the wire. Ordering between responses is not
//! specified; callers match replies by sequence number.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use geerpc_common::codec::{read_options, CodecReader, CodecWriter};
use geerpc_common::{CodecType, Header, Options, Result, RpcError, MAGIC_NUMBER};

use crate::service::{MethodHandler, Service};

/// An RPC server: a concurrent name-to-service map plus the connection
/// machinery that dispatches into it.
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Server {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            services: RwLock::new(HashMap::new()),
        })
    }

    /// Registers a service. Each name can be registered at most once.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        let name = service.name().to_string();
        if services.contains_key(&name) {
            return Err(RpcError::DuplicateRegistration(name));
        }
        info!(service = %name, "rpc server: registered service");
        services.insert(name, Arc::new(service));
        Ok(())
    }

    /// The registered service called `name`, if any. Mostly useful for
    /// inspecting invocation counters.
    pub fn service(&self, name: &str) -> Option<Arc<Service>> {
        self.services.read().unwrap().get(name).cloned()
    }

    /// Resolves a dotted `Service.Method` name to its handler.
    fn find_method(&self, service_method: &str) -> Result<Arc<MethodHandler>> {
        let Some((service_name, method_name)) = service_method.rsplit_once('.') else {
            return Err(RpcError::UnknownMethod(format!(
                "service/method in ill-formed name '{}'",
                service_method
            )));
        };
        let service = self
            .service(service_name)
            .ok_or_else(|| RpcError::UnknownMethod(format!("service {}", service_name)))?;
        service
            .handler(method_name)
            .ok_or_else(|| RpcError::UnknownMethod(format!("method {}", service_method)))
    }

    /// Accept loop: every connection is served on its own task. An accept
    /// error ends the loop.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(error = %err, "rpc server: accept error");
                    return;
                }
            };
            debug!(peer = %peer, "rpc server: connection accepted");
            let server = Arc::clone(&self);
            tokio::spawn(async move { server.serve_conn(stream).await });
        }
    }

    /// Serves one connection: options handshake, then the request loop.
    /// Generic over the stream so the CONNECT bridge can hand over an
    /// already-buffered upgrade.
    pub async fn serve_conn<S>(self: Arc<Self>, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let options = match read_options(&mut stream).await {
            Ok(options) => options,
            Err(err) => {
                warn!(error = %err, "rpc server: options error");
                return;
            }
        };
        if options.magic_number != MAGIC_NUMBER {
            warn!(
                magic = format_args!("{:#x}", options.magic_number),
                "rpc server: invalid magic number"
            );
            return;
        }
        self.serve_codec(stream, &options).await;
    }

    async fn serve_codec<S>(self: Arc<Self>, stream: S, options: &Options)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = CodecReader::new(options.codec_type, read_half);
        let writer = Arc::new(Mutex::new(CodecWriter::new(options.codec_type, write_half)));
        let mut workers: JoinSet<()> = JoinSet::new();

        loop {
            // Reap finished workers so a long-lived connection does not
            // accumulate join handles.
            while workers.try_join_next().is_some() {}

            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(err) => {
                    debug!(error = %err, "rpc server: read header ends connection");
                    break;
                }
            };
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(error = %err, "rpc server: read body error");
                    break;
                }
            };

            match self.find_method(&header.service_method) {
                Ok(method) => {
                    workers.spawn(handle_request(
                        method,
                        options.codec_type,
                        header,
                        body,
                        Arc::clone(&writer),
                        options.handle_timeout,
                    ));
                }
                // Lookup failures keep the connection: the response carries
                // the error under the request's own sequence number.
                Err(err) => {
                    send_response(&writer, options.codec_type, &header, Err(err)).await;
                }
            }
        }

        // Every worker joins before the codec goes away; a late handler must
        // never race connection teardown.
        while workers.join_next().await.is_some() {}
        let _ = writer.lock().await.close().await;
    }
}

/// Runs one request to completion. The handler executes on the blocking pool
/// while the deadline, if any, runs against it. When the deadline fires
/// first, the timeout response is written immediately and the handler's
/// eventual result is dropped with its detached task.
async fn handle_request<W>(
    method: Arc<MethodHandler>,
    codec_type: CodecType,
    header: Header,
    body: Vec<u8>,
    writer: Arc<Mutex<CodecWriter<W>>>,
    handle_timeout: Duration,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let invoke = tokio::task::spawn_blocking(move || method.invoke(codec_type, &body));
    let joined = if handle_timeout.is_zero() {
        invoke.await
    } else {
        match tokio::time::timeout(handle_timeout, invoke).await {
            Ok(joined) => joined,
            Err(_) => {
                let err = RpcError::Timeout(format!(
                    "rpc server: request handle timeout: expect within {:?}",
                    handle_timeout
                ));
                send_response(&writer, codec_type, &header, Err(err)).await;
                return;
            }
        }
    };
    let result = match joined {
        Ok(result) => result,
        Err(err) => Err(RpcError::Remote(format!(
            "rpc server: handler panicked: {}",
            err
        ))),
    };
    send_response(&writer, codec_type, &header, result).await;
}

/// Writes one response frame under the connection's write lock. Error text
/// rides in the header, with a unit placeholder body.
async fn send_response<W>(
    writer: &Mutex<CodecWriter<W>>,
    codec_type: CodecType,
    request: &Header,
    result: Result<Vec<u8>>,
) where
    W: AsyncWrite + Unpin,
{
    let mut header = Header {
        service_method: request.service_method.clone(),
        seq: request.seq,
        error: String::new(),
    };
    let body = match result {
        Ok(body) => body,
        Err(err) => {
            header.error = err.to_string();
            codec_type.encode(&()).unwrap_or_default()
        }
    };
    if let Err(err) = writer.lock().await.write(&header, &body).await {
        warn!(error = %err, "rpc server: write response error");
    }
}
