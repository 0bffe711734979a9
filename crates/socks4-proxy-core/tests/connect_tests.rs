//! CONNECT scenarios against a running proxy.
//!
//! Every test starts its own proxy and echo server on ephemeral loopback
//! ports through [`ProxyTestHarness`].

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use socks4_proxy_core::protocol::consts;
use socks4_proxy_core::testing::{ProxyTestHarness, TestHarnessBuilder};
use socks4_proxy_core::{Command, ProxyError, Reply, ReplyCode, Request};

/// Read until the peer closes, returning everything read.
async fn read_to_close(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("proxy did not close the connection")
        .expect("read failed");
    out
}

#[tokio::test]
async fn test_connect_exchange() {
    let mut harness = ProxyTestHarness::new().await;

    let mut client = harness.client();
    let bound = client.connect(&harness.echo_address()).await.unwrap();
    assert_eq!(bound.to_string(), harness.echo_address());

    let messages: [&[u8]; 3] = [b"first", b"second message", &[0u8; 4096]];
    for message in messages {
        client.write_all(message).await.unwrap();
        let mut buf = vec![0u8; message.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, message);
    }

    drop(client);
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let mut harness = ProxyTestHarness::new().await;

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let mut client = harness.client();
        let echo = harness.echo_address();
        tasks.push(tokio::spawn(async move {
            client.connect(&echo).await.unwrap();
            let payload = vec![i; 1024];
            client.write_all(&payload).await.unwrap();
            let mut buf = vec![0u8; payload.len()];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, payload);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(harness.echo().accepted(), 8);
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connect_refused_gets_error_reply() {
    let mut harness = ProxyTestHarness::new().await;
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut client = harness.client();
    let result = client.connect(&format!("127.0.0.1:{port}")).await;
    assert!(matches!(result, Err(ProxyError::Rejected(ReplyCode::Error))));

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_command_gets_error_then_close() {
    let mut harness = ProxyTestHarness::new().await;

    let mut raw = harness.raw_connection().await.unwrap();
    raw.write_all(&[4, 0, 0, 0, 0, 0, 0, 0, 0]).await.unwrap();

    let response = read_to_close(&mut raw).await;
    assert_eq!(response.len(), consts::REPLY_LEN);
    let reply = Reply::decode(&response).unwrap();
    assert_eq!(reply.version(), consts::VERSION);
    assert_eq!(reply.code(), ReplyCode::Error);

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_requests_get_no_reply() {
    let mut harness = ProxyTestHarness::new().await;

    // Short request, long request (64 byte user id), wrong version
    let mut long = vec![4, 1, 0, 80, 127, 0, 0, 1];
    long.extend_from_slice(&[b'a'; 64]);
    long.push(0);
    let cases: Vec<Vec<u8>> = vec![vec![4, 1, 0, 80], long, vec![5, 1, 0, 80, 127, 0, 0, 1, 0]];

    for case in cases {
        let mut raw = harness.raw_connection().await.unwrap();
        raw.write_all(&case).await.unwrap();
        assert!(read_to_close(&mut raw).await.is_empty(), "{case:?}");
    }

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_max_user_id_is_accepted() {
    let mut harness = ProxyTestHarness::new().await;

    let request = Request::from_address(
        Command::Connect,
        &harness.echo_address(),
        &"u".repeat(consts::MAX_USER_ID_LEN),
    )
    .unwrap();
    assert_eq!(request.serialized_len(), consts::MAX_REQUEST_LEN);

    let mut raw = harness.raw_connection().await.unwrap();
    raw.write_all(&request.to_bytes()).await.unwrap();
    let reply = Reply::read_from(&mut raw).await.unwrap();
    assert_eq!(reply.code(), ReplyCode::Success);

    drop(raw);
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_idle_session_is_closed() {
    let mut harness = TestHarnessBuilder::new()
        .relay_idle_timeout(Duration::from_millis(200))
        .build()
        .await;

    let mut client = harness.client();
    client.connect(&harness.echo_address()).await.unwrap();

    // Say nothing; the proxy closes the session after the idle timeout
    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(3), client.read(&mut buf))
        .await
        .expect("idle session was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_silent_client_hits_handshake_deadline() {
    let mut harness = TestHarnessBuilder::new()
        .handshake_timeout(Duration::from_millis(300))
        .deadline_headroom(Duration::from_millis(50))
        .build()
        .await;

    let mut raw = harness.raw_connection().await.unwrap();
    assert!(read_to_close(&mut raw).await.is_empty());

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_metrics_track_sessions() {
    let mut harness = ProxyTestHarness::new().await;

    let mut client = harness.client();
    client.connect(&harness.echo_address()).await.unwrap();
    client.write_all(b"count me").await.unwrap();
    let mut buf = [0u8; 8];
    client.read_exact(&mut buf).await.unwrap();
    drop(client);

    // Sessions must drain before the counters are final
    harness.shutdown().await.unwrap();

    let metrics = &harness.metrics;
    assert_eq!(metrics.connections_accepted.get(), 1);
    assert_eq!(metrics.active_sessions.get(), 0);
    assert_eq!(
        metrics
            .bytes_relayed
            .with_label_values(&["client_to_remote"])
            .get(),
        8
    );
    assert_eq!(
        metrics
            .bytes_relayed
            .with_label_values(&["remote_to_client"])
            .get(),
        8
    );
}
