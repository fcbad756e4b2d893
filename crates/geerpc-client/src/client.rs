//! The multiplexing client core.
//!
//! State lives behind two locks. The send lock (the codec writer's mutex)
//! serializes outbound frames; the state lock guards the pending-call table,
//! the sequence counter, and the `closing`/`shutdown` flags. Lock order is
//! always send before state; `terminate_calls` takes both in that order, so
//! reversing it anywhere would deadlock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch, Mutex};
use tracing::debug;

use geerpc_common::codec::{write_options, CodecReader, CodecWriter};
use geerpc_common::{CodecType, Header, Options, Result, RpcError};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Raw reply bytes, or the failure that ended the call.
type CallOutcome = std::result::Result<Vec<u8>, RpcError>;

/// One in-flight RPC issued through [`Client::go`].
pub struct Call {
    /// Sequence number the request went out under; 0 when the request never
    /// made it into the pending table.
    pub seq: u64,
    pub service_method: String,
    done: oneshot::Receiver<CallOutcome>,
}

impl Call {
    /// Resolves the call: the raw reply body on success, the recorded error
    /// otherwise. Signaled exactly once per call.
    pub async fn done(self) -> Result<Vec<u8>> {
        match self.done.await {
            Ok(outcome) => outcome,
            // The sender vanished without a verdict: another handle removed
            // the pending entry out from under us.
            Err(_) => Err(RpcError::Shutdown),
        }
    }
}

struct ClientState {
    /// Next sequence number. Starts at 1; 0 is the "no call" sentinel.
    seq: u64,
    pending: HashMap<u64, oneshot::Sender<CallOutcome>>,
    /// User asked to close.
    closing: bool,
    /// The connection died underneath us.
    shutdown: bool,
}

struct ClientCore {
    codec_type: CodecType,
    writer: Mutex<CodecWriter<BoxedWrite>>,
    state: StdMutex<ClientState>,
    close_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for ClientCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCore")
            .field("codec_type", &self.codec_type)
            .finish_non_exhaustive()
    }
}

/// Multiplexing RPC client. Clones share the connection.
#[derive(Clone, Debug)]
pub struct Client {
    core: Arc<ClientCore>,
}

impl Client {
    /// Performs the options handshake on an established stream and starts
    /// the background reader. A failed handshake drops the stream.
    pub async fn new<S>(mut stream: S, options: Options) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let options = options.normalized();
        write_options(&mut stream, &options).await?;

        let (read_half, write_half) = tokio::io::split(stream);
        let reader = CodecReader::new(options.codec_type, Box::new(read_half) as BoxedRead);
        let writer = CodecWriter::new(options.codec_type, Box::new(write_half) as BoxedWrite);
        let (close_tx, close_rx) = watch::channel(false);
        let core = Arc::new(ClientCore {
            codec_type: options.codec_type,
            writer: Mutex::new(writer),
            state: StdMutex::new(ClientState {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            close_tx,
        });
        tokio::spawn(receive(Arc::clone(&core), reader, close_rx));
        Ok(Client { core })
    }

    /// Issues a request asynchronously and returns its [`Call`] handle.
    /// Failures before the request reaches the wire (client shut down,
    /// argument encoding) resolve the handle immediately.
    pub async fn go<A: Serialize>(&self, service_method: &str, args: &A) -> Call {
        let (tx, rx) = oneshot::channel();
        let mut call = Call {
            seq: 0,
            service_method: service_method.to_string(),
            done: rx,
        };

        let body = match self.core.codec_type.encode(args) {
            Ok(body) => body,
            Err(err) => {
                let _ = tx.send(Err(err));
                return call;
            }
        };

        // Send lock first; the state lock nests inside register_call.
        let mut writer = self.core.writer.lock().await;
        let Some(seq) = self.register_call(tx) else {
            return call;
        };
        call.seq = seq;

        let header = Header {
            service_method: call.service_method.clone(),
            seq,
            error: String::new(),
        };
        if let Err(err) = writer.write(&header, &body).await {
            // The entry may already be gone: the reader observed the broken
            // connection first and terminated it.
            if let Some(tx) = self.remove_call(seq) {
                let _ = tx.send(Err(err));
            }
        }
        call
    }

    /// Synchronous call surface: issues the request and waits for the typed
    /// reply.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let call = self.go(service_method, args).await;
        let body = call.done().await?;
        self.core.codec_type.decode(&body)
    }

    /// Like [`Client::call`], but gives up as soon as `cancel` completes.
    /// A cancelled call is removed from the pending table, so its reply, if
    /// the server still produces one, is dropped as an orphan.
    pub async fn call_with_cancel<A, R, C>(
        &self,
        service_method: &str,
        args: &A,
        cancel: C,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
        C: Future<Output = ()>,
    {
        let call = self.go(service_method, args).await;
        let seq = call.seq;
        tokio::select! {
            _ = cancel => {
                self.remove_call(seq);
                Err(RpcError::Canceled)
            }
            outcome = call.done() => {
                let body = outcome?;
                self.core.codec_type.decode(&body)
            }
        }
    }

    /// Deadline variant of [`Client::call`]; a zero duration means no limit.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        if timeout.is_zero() {
            return self.call(service_method, args).await;
        }
        match self
            .call_with_cancel(service_method, args, tokio::time::sleep(timeout))
            .await
        {
            Err(RpcError::Canceled) => Err(RpcError::Timeout(format!(
                "rpc client: call timeout: expect within {:?}",
                timeout
            ))),
            other => other,
        }
    }

    /// False once the client is closing or the connection has died.
    pub fn is_available(&self) -> bool {
        let state = self.core.state.lock().unwrap();
        !state.closing && !state.shutdown
    }

    /// Calls still waiting for a reply.
    pub fn num_pending(&self) -> usize {
        self.core.state.lock().unwrap().pending.len()
    }

    /// Closes the connection. Every pending call resolves with
    /// [`RpcError::Shutdown`]; closing twice reports `Shutdown` itself.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.core.state.lock().unwrap();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        let _ = self.core.close_tx.send(true);
        terminate_calls(&self.core, RpcError::Shutdown).await;
        let _ = self.core.writer.lock().await.close().await;
        Ok(())
    }

    fn register_call(&self, tx: oneshot::Sender<CallOutcome>) -> Option<u64> {
        let mut state = self.core.state.lock().unwrap();
        if state.closing || state.shutdown {
            drop(state);
            let _ = tx.send(Err(RpcError::Shutdown));
            return None;
        }
        let seq = state.seq;
        state.seq += 1;
        state.pending.insert(seq, tx);
        Some(seq)
    }

    fn remove_call(&self, seq: u64) -> Option<oneshot::Sender<CallOutcome>> {
        self.core.state.lock().unwrap().pending.remove(&seq)
    }
}

/// Fails every pending call with `err`. Takes the send lock first so no
/// request frame is mid-write while the table drains.
async fn terminate_calls(core: &ClientCore, err: RpcError) {
    let _writer = core.writer.lock().await;
    let mut state = core.state.lock().unwrap();
    state.shutdown = true;
    for (_, tx) in state.pending.drain() {
        let _ = tx.send(Err(err.clone()));
    }
}

/// Connection reader: demultiplexes response frames back to their callers.
/// Runs until the stream fails or the client closes, then terminates
/// whatever is still pending.
async fn receive(
    core: Arc<ClientCore>,
    mut reader: CodecReader<BoxedRead>,
    mut close_rx: watch::Receiver<bool>,
) {
    let err = loop {
        let header = tokio::select! {
            _ = close_rx.changed() => break RpcError::Shutdown,
            header = reader.read_header() => match header {
                Ok(header) => header,
                Err(err) => break err,
            },
        };
        // The body is consumed either way; a frame must never be left half
        // read.
        let body = match reader.read_body().await {
            Ok(body) => body,
            Err(err) => break err,
        };
        let pending = core.state.lock().unwrap().pending.remove(&header.seq);
        match pending {
            // No such call: the write failed partway, or the caller
            // cancelled. The reply is an orphan; drop it.
            None => debug!(seq = header.seq, "rpc client: dropping orphan reply"),
            Some(tx) => {
                let outcome = if header.error.is_empty() {
                    Ok(body)
                } else {
                    Err(RpcError::Remote(header.error))
                };
                let _ = tx.send(outcome);
            }
        }
    };
    let err = if core.state.lock().unwrap().closing {
        RpcError::Shutdown
    } else {
        err
    };
    terminate_calls(&core, err).await;
}
