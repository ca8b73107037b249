use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use toolbridge_server::{Request, Response, Server, ServerConfig, ServerError, handler_fn};

fn echo_target(request: &Request<'_>) -> Result<Response, toolbridge_server::HandlerError> {
    Ok(Response::ok().with_body(request.target().to_string()))
}

async fn read_response(stream: &mut TcpStream, pending: &mut Vec<u8>) -> (String, Vec<u8>) {
    let head_end = loop {
        if let Some(index) = pending.windows(4).position(|window| window == b"\r\n\r\n") {
            break index + 4;
        }
        let mut chunk = [0u8; 1024];
        let read = stream.read(&mut chunk).await.unwrap();
        assert_ne!(read, 0, "server closed before responding");
        pending.extend_from_slice(&chunk[..read]);
    };
    let head = String::from_utf8(pending.drain(..head_end).collect()).unwrap();
    let length: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .map(|value| value.parse().unwrap())
        .unwrap_or(0);
    while pending.len() < length {
        let mut chunk = [0u8; 1024];
        let read = stream.read(&mut chunk).await.unwrap();
        assert_ne!(read, 0, "server closed inside a body");
        pending.extend_from_slice(&chunk[..read]);
    }
    let body = pending.drain(..length).collect();
    (head, body)
}

#[tokio::test]
async fn serves_keep_alive_requests_over_tcp() {
    let server = Arc::new(
        Server::bind(ServerConfig::default(), handler_fn(echo_target))
            .await
            .unwrap(),
    );
    let addr = server.local_addr();
    let stop = server.stop_handle();
    let running = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut pending = Vec::new();

    stream
        .write_all(b"GET /one HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream, &mut pending).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Connection: keep-alive\r\n"));
    assert!(head.contains("Keep-Alive: timeout=30, max=200\r\n"));
    assert_eq!(body, b"/one");

    stream
        .write_all(b"GET /two HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream, &mut pending).await;
    assert!(head.contains("Connection: close\r\n"));
    assert!(!head.contains("Keep-Alive"));
    assert_eq!(body, b"/two");

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    drop(stream);

    stop.stop();
    running.await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(5), server.wait_for_connections())
        .await
        .unwrap();
    assert_eq!(server.active_connections(), 0);
}

#[tokio::test]
async fn serves_connections_concurrently() {
    let server = Arc::new(
        Server::bind(ServerConfig::default(), handler_fn(echo_target))
            .await
            .unwrap(),
    );
    let addr = server.local_addr();
    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let server = Arc::clone(&server);
        let cancel = cancel.clone();
        async move { server.run_until(cancel).await }
    });

    let mut idle = TcpStream::connect(addr).await.unwrap();
    idle.write_all(b"GET /partial HTTP/1.1\r\n").await.unwrap();

    let mut busy = TcpStream::connect(addr).await.unwrap();
    let mut pending = Vec::new();
    busy.write_all(b"GET /busy HTTP/1.1\r\n\r\n").await.unwrap();
    let (_, body) = read_response(&mut busy, &mut pending).await;
    assert_eq!(body, b"/busy");

    cancel.cancel();
    running.await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(5), server.wait_for_connections())
        .await
        .unwrap();

    let mut rest = Vec::new();
    let _ = idle.read_to_end(&mut rest).await;
    assert!(rest.is_empty());
}

#[tokio::test]
async fn stop_lets_idle_connections_close() {
    let server = Arc::new(
        Server::bind(ServerConfig::default(), handler_fn(echo_target))
            .await
            .unwrap(),
    );
    let addr = server.local_addr();
    let stop = server.stop_handle();
    let running = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut pending = Vec::new();
    stream.write_all(b"GET /a HTTP/1.1\r\n\r\n").await.unwrap();
    read_response(&mut stream, &mut pending).await;

    stop.stop();
    assert!(stop.is_stopped());
    running.await.unwrap().unwrap();

    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());
    tokio::time::timeout(Duration::from_secs(5), server.wait_for_connections())
        .await
        .unwrap();
}

#[tokio::test]
async fn rejects_invalid_configuration() {
    let mut config = ServerConfig::default();
    config.keep_alive.max_requests = 0;

    let result = Server::bind(config, handler_fn(echo_target)).await;
    assert_matches!(result.err(), Some(ServerError::Config(_)));
}

#[tokio::test]
async fn reports_port_in_use() {
    let first = Server::bind(ServerConfig::default(), handler_fn(echo_target))
        .await
        .unwrap();

    let mut config = ServerConfig::default();
    config.listen.port = first.local_addr().port();
    let result = Server::bind(config, handler_fn(echo_target)).await;
    assert_matches!(result.err(), Some(ServerError::Bind { .. }));
}
