//! Heartbeat sender: keeps one server's registry entry alive.

use std::time::Duration;

use tracing::{debug, warn};

use geerpc_common::{Result, RpcError, SERVER_HEADER};

use crate::registry::DEFAULT_TIMEOUT;

/// Starts heartbeating `addr` against the registry URL. The first beat is
/// sent before returning, so an unreachable registry surfaces immediately;
/// after that a background task beats every `period` until the first
/// transport error. The default period is the registry TTL minus one minute,
/// which guarantees at least one beat lands inside every TTL window.
pub async fn start_heartbeat(registry: &str, addr: &str, period: Option<Duration>) -> Result<()> {
    let period = match period {
        Some(period) if !period.is_zero() => period,
        _ => DEFAULT_TIMEOUT.saturating_sub(Duration::from_secs(60)),
    };
    let http = reqwest::Client::new();
    send_heartbeat(&http, registry, addr).await?;

    let registry = registry.to_string();
    let addr = addr.to_string();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately and the first beat already
        // went out; consume it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = send_heartbeat(&http, &registry, &addr).await {
                warn!(addr = %addr, error = %err, "rpc server: heartbeat stopped");
                return;
            }
        }
    });
    Ok(())
}

async fn send_heartbeat(http: &reqwest::Client, registry: &str, addr: &str) -> Result<()> {
    debug!(addr = %addr, registry = %registry, "rpc server: send heartbeat");
    let response = http
        .post(registry)
        .header(SERVER_HEADER, addr)
        .send()
        .await
        .map_err(|err| RpcError::Transport(err.to_string()))?;
    if !response.status().is_success() {
        return Err(RpcError::Transport(format!(
            "registry rejected heartbeat: {}",
            response.status()
        )));
    }
    Ok(())
}
