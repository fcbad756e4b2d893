// End-to-end tests over real TCP connections: a server with an arithmetic
// service on an ephemeral port, a multiplexing client dialed against it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use geerpc_client::Client;
use geerpc_common::codec::write_options;
use geerpc_common::{CodecType, Options, RpcError, MAGIC_NUMBER};
use geerpc_server::{Server, Service};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Args {
    num1: i64,
    num2: i64,
}

fn arith_service() -> Service {
    Service::new("Foo")
        .method("Sum", |args: Args, reply: &mut i64| {
            *reply = args.num1 + args.num2;
            Ok(())
        })
        .method("Sleep", |args: Args, reply: &mut i64| {
            std::thread::sleep(Duration::from_millis(args.num1 as u64));
            *reply = args.num1 + args.num2;
            Ok(())
        })
        .method("Fail", |_: Args, _: &mut i64| {
            Err("division by zero".to_string())
        })
}

async fn start_server() -> (String, Arc<Server>) {
    let server = Server::new();
    server.register(arith_service()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(Arc::clone(&server).accept(listener));
    (addr, server)
}

#[tokio::test]
async fn test_basic_call() {
    let (addr, server) = start_server().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();

    let reply: i64 = client
        .call("Foo.Sum", &Args { num1: 3, num2: 4 })
        .await
        .unwrap();
    assert_eq!(reply, 7);
    assert_eq!(server.service("Foo").unwrap().num_calls("Sum"), 1);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_call_with_json_codec() {
    let (addr, _server) = start_server().await;
    let options = Options {
        codec_type: CodecType::Json,
        ..Options::default()
    };
    let client = Client::dial(&addr, options).await.unwrap();
    let reply: i64 = client
        .call("Foo.Sum", &Args { num1: 20, num2: 22 })
        .await
        .unwrap();
    assert_eq!(reply, 42);
}

#[tokio::test]
async fn test_unknown_method_keeps_connection() {
    let (addr, _server) = start_server().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();

    let err = client
        .call::<_, i64>("Foo.Nope", &Args { num1: 1, num2: 1 })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("can't find method"));

    let err = client
        .call::<_, i64>("Bar.Sum", &Args { num1: 1, num2: 1 })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("can't find service"));

    // The connection survived both lookup failures.
    let reply: i64 = client
        .call("Foo.Sum", &Args { num1: 1, num2: 1 })
        .await
        .unwrap();
    assert_eq!(reply, 2);
}

#[tokio::test]
async fn test_handler_error_reaches_caller() {
    let (addr, _server) = start_server().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();
    let err = client
        .call::<_, i64>("Foo.Fail", &Args { num1: 0, num2: 0 })
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Remote("division by zero".into()));
}

#[tokio::test]
async fn test_concurrent_calls_route_to_their_callers() {
    let (addr, server) = start_server().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();

    let mut tasks = Vec::new();
    for task in 0..10i64 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..5i64 {
                let num1 = task * 100 + i;
                let reply: i64 = client
                    .call("Foo.Sum", &Args { num1, num2: 1 })
                    .await
                    .unwrap();
                assert_eq!(reply, num1 + 1);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(server.service("Foo").unwrap().num_calls("Sum"), 50);
    assert_eq!(client.num_pending(), 0);
}

#[tokio::test]
async fn test_handler_timeout_then_connection_reuse() {
    let (addr, _server) = start_server().await;
    let options = Options {
        handle_timeout: Duration::from_millis(100),
        ..Options::default()
    };
    let client = Client::dial(&addr, options).await.unwrap();

    let err = client
        .call::<_, i64>("Foo.Sleep", &Args { num1: 2000, num2: 0 })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timeout"), "got: {}", err);

    // The connection stays usable after a timed-out handler.
    let reply: i64 = client
        .call("Foo.Sum", &Args { num1: 5, num2: 6 })
        .await
        .unwrap();
    assert_eq!(reply, 11);
}

#[tokio::test]
async fn test_zero_handle_timeout_lets_slow_handlers_finish() {
    let (addr, _server) = start_server().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();
    let reply: i64 = client
        .call("Foo.Sleep", &Args { num1: 300, num2: 1 })
        .await
        .unwrap();
    assert_eq!(reply, 301);
}

#[tokio::test]
async fn test_cancelled_call_drops_orphan_reply() {
    let (addr, _server) = start_server().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();

    let err = client
        .call_with_cancel::<_, i64, _>(
            "Foo.Sleep",
            &Args { num1: 500, num2: 0 },
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Canceled);
    assert_eq!(client.num_pending(), 0);

    // The server finishes the sleep eventually and its reply arrives as an
    // orphan; neither that nor new traffic may trip over it.
    let reply: i64 = client
        .call("Foo.Sum", &Args { num1: 2, num2: 3 })
        .await
        .unwrap();
    assert_eq!(reply, 5);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(client.num_pending(), 0);
    assert!(client.is_available());
}

#[tokio::test]
async fn test_call_timeout_maps_to_timeout_error() {
    let (addr, _server) = start_server().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();
    let err = client
        .call_timeout::<_, i64>(
            "Foo.Sleep",
            &Args { num1: 500, num2: 0 },
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout(_)));
}

#[tokio::test]
async fn test_close_fails_pending_and_later_calls() {
    let (addr, _server) = start_server().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();

    let pending = client.go("Foo.Sleep", &Args { num1: 2000, num2: 0 }).await;
    client.close().await.unwrap();

    // The pending call was signaled with shutdown, exactly once.
    assert_eq!(pending.done().await.unwrap_err(), RpcError::Shutdown);
    assert_eq!(client.num_pending(), 0);

    // Every later call fails fast.
    let err = client
        .call::<_, i64>("Foo.Sum", &Args { num1: 1, num2: 1 })
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Shutdown);
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let server = Server::new();
    server.register(arith_service()).unwrap();
    let err = server.register(arith_service()).unwrap_err();
    assert_eq!(err, RpcError::DuplicateRegistration("Foo".into()));
}

#[tokio::test]
async fn test_wrong_magic_number_closes_connection() {
    let (addr, _server) = start_server().await;
    let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
    let options = Options {
        magic_number: 0x0bad,
        ..Options::default()
    };
    assert_ne!(options.magic_number, MAGIC_NUMBER);
    write_options(&mut stream, &options).await.unwrap();

    // The server hangs up without a response frame.
    let mut buf = [0u8; 1];
    use tokio::io::AsyncReadExt;
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_http_bridge_end_to_end() {
    let (server_addr, server) = {
        let server = Server::new();
        server.register(arith_service()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(Arc::clone(&server).serve_http(listener));
        (addr, server)
    };

    let client = Client::dial_http(&server_addr, Options::default())
        .await
        .unwrap();
    let reply: i64 = client
        .call("Foo.Sum", &Args { num1: 10, num2: 20 })
        .await
        .unwrap();
    assert_eq!(reply, 30);
    assert_eq!(server.service("Foo").unwrap().num_calls("Sum"), 1);

    // The protocol@addr form reaches the same bridge.
    let client = Client::dial_rpc_addr(&format!("http@{}", server_addr), Options::default())
        .await
        .unwrap();
    let reply: i64 = client
        .call("Foo.Sum", &Args { num1: 1, num2: 2 })
        .await
        .unwrap();
    assert_eq!(reply, 3);
}

#[tokio::test]
async fn test_http_bridge_rejects_non_connect() {
    let server = Server::new();
    server.register(arith_service()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.serve_http(listener));

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
    stream
        .write_all(b"GET /_geerpc_ HTTP/1.0\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.0 405"));
}
