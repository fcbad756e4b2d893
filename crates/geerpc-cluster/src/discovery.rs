//! Service discovery: a dynamic server set plus a selection policy.

use std::future::Future;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use geerpc_common::{Result, RpcError, SERVERS_HEADER};

/// How [`Discovery::get`] picks among the known servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniform pick across the current list.
    Random,
    /// Cyclic pick, advancing `(i + 1) % n` per call.
    RoundRobin,
}

/// Read-side view of a dynamic server set.
pub trait Discovery: Send + Sync + 'static {
    /// Re-fetches the server list from its source, when there is one.
    fn refresh(&self) -> impl Future<Output = Result<()>> + Send;
    /// Replaces the server list by hand.
    fn update(&self, servers: Vec<String>) -> impl Future<Output = Result<()>> + Send;
    /// Picks one server according to `mode`; fails with
    /// [`RpcError::DiscoveryEmpty`] on an empty list.
    fn get(&self, mode: SelectMode) -> impl Future<Output = Result<String>> + Send;
    /// Snapshot of every known server.
    fn get_all(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}

struct Servers {
    list: Vec<String>,
    /// Round-robin cursor.
    index: usize,
}

/// Discovery over a hand-maintained server list; no registry involved.
pub struct MultiServersDiscovery {
    inner: RwLock<Servers>,
}

impl MultiServersDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        // Random starting cursor so every fresh process does not hammer the
        // first server in the list.
        let index = rand::thread_rng().gen_range(0..u32::MAX as usize);
        Self {
            inner: RwLock::new(Servers {
                list: servers,
                index,
            }),
        }
    }
}

impl Discovery for MultiServersDiscovery {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.inner.write().unwrap().list = servers;
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        let mut inner = self.inner.write().unwrap();
        let n = inner.list.len();
        if n == 0 {
            return Err(RpcError::DiscoveryEmpty);
        }
        match mode {
            SelectMode::Random => {
                let pick = rand::thread_rng().gen_range(0..n);
                Ok(inner.list[pick].clone())
            }
            SelectMode::RoundRobin => {
                let server = inner.list[inner.index % n].clone();
                inner.index = (inner.index + 1) % n;
                Ok(server)
            }
        }
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().unwrap().list.clone())
    }
}

/// Default freshness window for a registry-backed server list.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Discovery backed by a heartbeat registry. The fetched list is cached for
/// the update timeout and refreshed transparently when a `get` finds it
/// stale; a zero timeout refreshes on every access.
pub struct RegistryDiscovery {
    servers: MultiServersDiscovery,
    registry: String,
    update_timeout: Duration,
    last_update: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    /// `registry` is the registry's full URL, e.g.
    /// `http://127.0.0.1:9999/_geerpc_/registry`.
    pub fn new(registry: impl Into<String>, update_timeout: Option<Duration>) -> Self {
        Self {
            servers: MultiServersDiscovery::new(Vec::new()),
            registry: registry.into(),
            update_timeout: update_timeout.unwrap_or(DEFAULT_UPDATE_TIMEOUT),
            last_update: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    fn stale(&self) -> bool {
        match *self.last_update.lock().unwrap() {
            None => true,
            Some(at) => self.update_timeout.is_zero() || at + self.update_timeout <= Instant::now(),
        }
    }

    async fn ensure_fresh(&self) -> Result<()> {
        if self.stale() {
            self.refresh().await
        } else {
            Ok(())
        }
    }
}

impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        let response = self
            .http
            .get(&self.registry)
            .send()
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        let servers: Vec<String> = response
            .headers()
            .get(SERVERS_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|server| !server.is_empty())
            .map(str::to_string)
            .collect();
        debug!(registry = %self.registry, servers = servers.len(), "rpc discovery: refreshed");
        self.servers.update(servers).await?;
        *self.last_update.lock().unwrap() = Some(Instant::now());
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.servers.update(servers).await?;
        *self.last_update.lock().unwrap() = Some(Instant::now());
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.ensure_fresh().await?;
        self.servers.get(mode).await
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        self.ensure_fresh().await?;
        self.servers.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn three() -> Vec<String> {
        vec!["tcp@a".into(), "tcp@b".into(), "tcp@c".into()]
    }

    #[tokio::test]
    async fn test_empty_list_fails() {
        let discovery = MultiServersDiscovery::new(Vec::new());
        assert_eq!(
            discovery.get(SelectMode::Random).await.unwrap_err(),
            RpcError::DiscoveryEmpty
        );
        assert_eq!(
            discovery.get(SelectMode::RoundRobin).await.unwrap_err(),
            RpcError::DiscoveryEmpty
        );
        assert!(discovery.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_round_robin_cycles_evenly() {
        let discovery = MultiServersDiscovery::new(three());
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..30 {
            let server = discovery.get(SelectMode::RoundRobin).await.unwrap();
            *counts.entry(server).or_insert(0) += 1;
        }
        // Wherever the random cursor started, a full number of cycles visits
        // each server the same number of times.
        assert_eq!(counts.len(), 3);
        for (_, count) in counts {
            assert_eq!(count, 10);
        }
    }

    #[tokio::test]
    async fn test_round_robin_consecutive_picks_differ() {
        let discovery = MultiServersDiscovery::new(three());
        let first = discovery.get(SelectMode::RoundRobin).await.unwrap();
        let second = discovery.get(SelectMode::RoundRobin).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_random_picks_a_member() {
        let servers = three();
        let discovery = MultiServersDiscovery::new(servers.clone());
        for _ in 0..20 {
            let pick = discovery.get(SelectMode::Random).await.unwrap();
            assert!(servers.contains(&pick));
        }
    }

    #[tokio::test]
    async fn test_update_replaces_list() {
        let discovery = MultiServersDiscovery::new(three());
        discovery.update(vec!["tcp@only".into()]).await.unwrap();
        assert_eq!(discovery.get_all().await.unwrap(), vec!["tcp@only".to_string()]);
        for _ in 0..5 {
            assert_eq!(
                discovery.get(SelectMode::RoundRobin).await.unwrap(),
                "tcp@only"
            );
        }
    }

    #[tokio::test]
    async fn test_get_all_returns_a_copy() {
        let discovery = MultiServersDiscovery::new(three());
        let mut snapshot = discovery.get_all().await.unwrap();
        snapshot.push("tcp@intruder".into());
        assert_eq!(discovery.get_all().await.unwrap(), three());
    }

    #[tokio::test]
    async fn test_registry_discovery_starts_stale() {
        let discovery = RegistryDiscovery::new("http://127.0.0.1:1/_geerpc_/registry", None);
        assert!(discovery.stale());
        // A stale get must attempt the refresh; the dead registry turns it
        // into a transport error rather than an empty success.
        let err = discovery.get(SelectMode::Random).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }
}
