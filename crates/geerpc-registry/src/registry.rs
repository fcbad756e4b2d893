//! The registry directory and its HTTP surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use geerpc_common::{Result, DEFAULT_REGISTRY_PATH, SERVERS_HEADER, SERVER_HEADER};

/// Entries older than this are treated as dead unless refreshed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// In-memory server directory with TTL-based liveness.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    /// A registry whose entries expire `timeout` after their last heartbeat;
    /// zero disables expiry.
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        })
    }

    /// Inserts the address or refreshes its last-seen time.
    pub fn put_server(&self, addr: &str) {
        let mut servers = self.servers.lock().unwrap();
        servers.insert(addr.to_string(), Instant::now());
    }

    /// Sorted list of live addresses. Expired entries are deleted on the
    /// way out.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        let now = Instant::now();
        let timeout = self.timeout;
        servers.retain(|_, last_seen| timeout.is_zero() || *last_seen + timeout > now);
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// Number of entries currently held, dead or alive.
    pub fn len(&self) -> usize {
        self.servers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.lock().unwrap().is_empty()
    }

    /// Router serving the registry protocol at [`DEFAULT_REGISTRY_PATH`].
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(DEFAULT_REGISTRY_PATH, any(handle))
            .with_state(self)
    }

    /// Serves on the listener until it fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(path = DEFAULT_REGISTRY_PATH, "rpc registry: serving");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// GET returns the live list in a header; POST registers or refreshes the
/// address named in a header; anything else is not allowed.
async fn handle(State(registry): State<Arc<Registry>>, method: Method, headers: HeaderMap) -> Response {
    match method {
        Method::GET => {
            let alive = registry.alive_servers().join(",");
            ([(SERVERS_HEADER, alive)]).into_response()
        }
        Method::POST => match headers.get(SERVER_HEADER).and_then(|value| value.to_str().ok()) {
            Some(addr) if !addr.is_empty() => {
                registry.put_server(addr);
                StatusCode::OK.into_response()
            }
            _ => {
                warn!("rpc registry: heartbeat without server address header");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alive_list_is_sorted() {
        let registry = Registry::new(DEFAULT_TIMEOUT);
        registry.put_server("tcp@zebra:1");
        registry.put_server("tcp@alpha:1");
        registry.put_server("tcp@middle:1");
        assert_eq!(
            registry.alive_servers(),
            vec![
                "tcp@alpha:1".to_string(),
                "tcp@middle:1".to_string(),
                "tcp@zebra:1".to_string()
            ]
        );
    }

    #[test]
    fn test_repeated_puts_do_not_grow() {
        let registry = Registry::new(DEFAULT_TIMEOUT);
        for _ in 0..10 {
            registry.put_server("tcp@only:1");
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_expired_entries_are_evicted_on_read() {
        let registry = Registry::new(Duration::from_millis(50));
        registry.put_server("tcp@shortlived:1");
        std::thread::sleep(Duration::from_millis(80));
        assert!(registry.alive_servers().is_empty());
        // The eviction is a real delete, not just a filter.
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_zero_timeout_disables_expiry() {
        let registry = Registry::new(Duration::ZERO);
        registry.put_server("tcp@forever:1");
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(registry.alive_servers(), vec!["tcp@forever:1".to_string()]);
    }

    #[test]
    fn test_refresh_keeps_entry_alive() {
        let registry = Registry::new(Duration::from_millis(100));
        registry.put_server("tcp@beating:1");
        std::thread::sleep(Duration::from_millis(60));
        registry.put_server("tcp@beating:1");
        std::thread::sleep(Duration::from_millis(60));
        // 120 ms after the first beat, but only 60 ms after the refresh.
        assert_eq!(registry.alive_servers(), vec!["tcp@beating:1".to_string()]);
    }
}
