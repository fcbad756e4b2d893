// HTTP surface tests: the registry protocol is all headers, no bodies.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use geerpc_common::{DEFAULT_REGISTRY_PATH, SERVERS_HEADER, SERVER_HEADER};
use geerpc_registry::{start_heartbeat, Registry, DEFAULT_TIMEOUT};

async fn serve_registry(timeout: Duration) -> (Arc<Registry>, String) {
    let registry = Registry::new(timeout);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!(
        "http://{}{}",
        listener.local_addr().unwrap(),
        DEFAULT_REGISTRY_PATH
    );
    tokio::spawn(Arc::clone(&registry).serve(listener));
    (registry, url)
}

fn servers_header(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(SERVERS_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}

#[tokio::test]
async fn test_get_on_empty_registry() {
    let (_registry, url) = serve_registry(DEFAULT_TIMEOUT).await;
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(servers_header(&response), "");
    assert_eq!(response.bytes().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_post_then_get_sorted() {
    let (_registry, url) = serve_registry(DEFAULT_TIMEOUT).await;
    let http = reqwest::Client::new();
    for addr in ["tcp@zeta:9", "tcp@alpha:1", "tcp@mid:5"] {
        let response = http
            .post(&url)
            .header(SERVER_HEADER, addr)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(servers_header(&response), "tcp@alpha:1,tcp@mid:5,tcp@zeta:9");
}

#[tokio::test]
async fn test_post_without_header_is_500() {
    let (_registry, url) = serve_registry(DEFAULT_TIMEOUT).await;
    let response = reqwest::Client::new().post(&url).send().await.unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn test_other_methods_are_405() {
    let (_registry, url) = serve_registry(DEFAULT_TIMEOUT).await;
    let http = reqwest::Client::new();
    let response = http.delete(&url).send().await.unwrap();
    assert_eq!(response.status(), 405);
    let response = http.put(&url).send().await.unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn test_expired_servers_leave_the_list() {
    let (registry, url) = serve_registry(Duration::from_millis(200)).await;
    let http = reqwest::Client::new();
    http.post(&url)
        .header(SERVER_HEADER, "tcp@shortlived:1")
        .send()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(servers_header(&response), "");
    assert_eq!(registry.len(), 0);
}

#[tokio::test]
async fn test_heartbeats_keep_entry_fresh_without_growth() {
    let (registry, url) = serve_registry(Duration::from_millis(400)).await;
    start_heartbeat(&url, "tcp@beating:1", Some(Duration::from_millis(100)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;
    // Well past the TTL, the heartbeats kept exactly one entry alive.
    assert_eq!(registry.alive_servers(), vec!["tcp@beating:1".to_string()]);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_heartbeat_against_dead_registry_fails_immediately() {
    let err = start_heartbeat(
        "http://127.0.0.1:1/_geerpc_/registry",
        "tcp@nobody:1",
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, geerpc_common::RpcError::Transport(_)));
}
