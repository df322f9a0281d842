//! End-to-end lifecycle tests over a real listener.

use std::sync::Arc;
use std::time::Duration;
use terraform_mcp_server::{
    config::HttpConfig, error::ServerError, mcp::ProtocolHandler, StreamableHttpServer,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

fn local_config() -> HttpConfig {
    HttpConfig {
        port: 0,
        keep_alive_interval: Some(Duration::from_millis(100)),
        shutdown_timeout: Duration::from_secs(2),
        ..HttpConfig::default()
    }
}

/// Read from `stream` until `needle` shows up in the accumulated text.
async fn read_until(stream: &mut TcpStream, seen: &mut String, needle: &str) {
    let mut buf = [0u8; 4096];
    while !seen.contains(needle) {
        let n = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}, got {seen:?}"))
            .unwrap();
        assert!(n > 0, "connection closed before {needle:?} arrived");
        seen.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
}

#[tokio::test]
async fn test_shutdown_cancels_streams_and_drains() {
    let server = StreamableHttpServer::new(&local_config(), Arc::new(ProtocolHandler::new()));
    let keep_alive = server.keep_alive().clone();
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(bound.run_until(async {
        let _ = stop_rx.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /mcp HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n",
        )
        .await
        .unwrap();

    let mut seen = String::new();
    read_until(&mut stream, &mut seen, "mcp-session-id").await;
    read_until(&mut stream, &mut seen, r#"{"jsonrpc":"2.0","method":"ping"}"#).await;
    assert!(seen.starts_with("HTTP/1.1 200"));
    assert_eq!(keep_alive.active_sessions().await.len(), 1);

    stop_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("shutdown should finish within the drain window")
        .unwrap();
    assert!(result.is_ok());
    assert!(keep_alive.active_sessions().await.is_empty());

    // The stream was closed rather than left open with a live ping task.
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .expect("connection should be closed after shutdown")
        .unwrap();

    let registration = keep_alive.register("after-shutdown").await;
    assert!(registration.is_none());
}

#[tokio::test]
async fn test_drain_timeout_force_closes_unpinged_streams() {
    let config = HttpConfig {
        keep_alive_interval: None,
        shutdown_timeout: Duration::from_millis(200),
        ..local_config()
    };
    let bound = StreamableHttpServer::new(&config, Arc::new(ProtocolHandler::new()))
        .bind()
        .await
        .unwrap();
    let addr = bound.local_addr();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(bound.run_until(async {
        let _ = stop_rx.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /mcp HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n",
        )
        .await
        .unwrap();

    let mut seen = String::new();
    read_until(&mut stream, &mut seen, "\r\n\r\n").await;
    assert!(seen.starts_with("HTTP/1.1 200"));

    stop_tx.send(()).unwrap();

    // No keep-alive task owns this stream, so only the force-close can end it.
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(3), stream.read_to_end(&mut rest))
        .await
        .expect("stream should be force-closed after the drain timeout")
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(3), running)
        .await
        .expect("shutdown should finish after the force-close")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_health_over_tcp() {
    let server = StreamableHttpServer::new(&local_config(), Arc::new(ProtocolHandler::new()));
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(bound.run_until(async {
        let _ = stop_rx.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(3), stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(
        r#"{"status":"ok","service":"terraform-mcp-server","transport":"streamable-http"}"#
    ));

    stop_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bind_conflict_is_an_error() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let config = HttpConfig {
        port: taken.local_addr().unwrap().port(),
        ..local_config()
    };

    let result = StreamableHttpServer::new(&config, Arc::new(ProtocolHandler::new()))
        .bind()
        .await;

    assert!(matches!(result, Err(ServerError::Bind { .. })));
}
