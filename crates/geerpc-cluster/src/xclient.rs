//! Load-balanced cluster client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use geerpc_client::Client;
use geerpc_common::{Options, Result, RpcError};

use crate::discovery::{Discovery, SelectMode};

struct XInner<D> {
    discovery: D,
    mode: SelectMode,
    options: Options,
    /// One cached connection per `protocol@address`.
    clients: Mutex<HashMap<String, Client>>,
}

/// A client over a whole fleet: discovery picks the server, a per-address
/// cache reuses connections, and [`broadcast`](XClient::broadcast) fans one
/// call out to every discovered server. Clones share the cache.
pub struct XClient<D: Discovery> {
    inner: Arc<XInner<D>>,
}

impl<D: Discovery> Clone for XClient<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct BroadcastState<R> {
    error: Option<RpcError>,
    reply: Option<R>,
}

impl<D: Discovery> XClient<D> {
    pub fn new(discovery: D, mode: SelectMode, options: Options) -> Self {
        Self {
            inner: Arc::new(XInner {
                discovery,
                mode,
                options,
                clients: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Cached healthy client for `rpc_addr`, dialing lazily. A cached but
    /// dead client is closed, discarded, and redialed.
    async fn dial(&self, rpc_addr: &str) -> Result<Client> {
        let mut clients = self.inner.clients.lock().await;
        if let Some(client) = clients.get(rpc_addr) {
            if client.is_available() {
                return Ok(client.clone());
            }
        }
        if let Some(stale) = clients.remove(rpc_addr) {
            debug!(addr = %rpc_addr, "rpc xclient: discarding dead cached client");
            let _ = stale.close().await;
        }
        let client = Client::dial_rpc_addr(rpc_addr, self.inner.options.clone()).await?;
        clients.insert(rpc_addr.to_string(), client.clone());
        Ok(client)
    }

    /// Unicast: let discovery pick one server by the configured mode, then
    /// invoke on it.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let rpc_addr = self.inner.discovery.get(self.inner.mode).await?;
        let client = self.dial(&rpc_addr).await?;
        client.call(service_method, args).await
    }

    /// Fan-out invoke on every discovered server, each worker decoding into
    /// its own fresh reply. The first failure cancels the calls still in
    /// flight; the first success supplies the returned reply. All workers
    /// are joined before returning, and the first recorded error, if any,
    /// wins over any success.
    pub async fn broadcast<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let servers = self.inner.discovery.get_all().await?;
        if servers.is_empty() {
            return Err(RpcError::DiscoveryEmpty);
        }

        let state = StdMutex::new(BroadcastState::<R> {
            error: None,
            reply: None,
        });
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let calls = servers.iter().map(|rpc_addr| {
            let mut cancel_rx = cancel_rx.clone();
            let state = &state;
            let cancel_tx = &cancel_tx;
            async move {
                let result: Result<R> = async {
                    let client = self.dial(rpc_addr).await?;
                    client
                        .call_with_cancel(service_method, args, async move {
                            let _ = cancel_rx.changed().await;
                        })
                        .await
                }
                .await;

                let mut state = state.lock().unwrap();
                match result {
                    Ok(reply) => {
                        if state.reply.is_none() {
                            state.reply = Some(reply);
                        }
                    }
                    Err(err) => {
                        if state.error.is_none() {
                            debug!(addr = %rpc_addr, error = %err, "rpc xclient: broadcast failure, canceling group");
                            state.error = Some(err);
                            let _ = cancel_tx.send(true);
                        }
                    }
                }
            }
        });
        join_all(calls).await;

        let state = state.into_inner().unwrap();
        match state.error {
            Some(err) => Err(err),
            None => state.reply.ok_or(RpcError::DiscoveryEmpty),
        }
    }

    /// Closes and drops every cached client.
    pub async fn close(&self) {
        let mut clients = self.inner.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
    }
}
