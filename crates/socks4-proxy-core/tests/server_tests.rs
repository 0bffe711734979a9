//! Listener lifecycle: start, stop and bounded graceful shutdown.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use socks4_proxy_core::testing::{EchoServer, ProxyTestHarness};
use socks4_proxy_core::{ProxyConfig, ProxyError, ProxyListener, Socks4Client};

fn config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.session.handshake_timeout_ms = 2000;
    config.session.deadline_headroom_ms = 200;
    config
}

#[tokio::test]
async fn test_stop_never_started_is_noop() {
    let mut listener = ProxyListener::new(config());
    assert!(listener.stop(Duration::from_millis(1)).await.is_ok());
    assert!(listener.local_addr().is_none());
}

#[tokio::test]
async fn test_start_on_used_port_fails() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = taken.local_addr().unwrap().to_string();

    let mut listener = ProxyListener::new(config());
    let result = listener.start(&endpoint).await;
    match result {
        Err(ProxyError::Bind { endpoint: e, .. }) => assert_eq!(e, endpoint),
        other => panic!("expected bind error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_start_twice_fails() {
    let mut listener = ProxyListener::new(config());
    listener.start("127.0.0.1:0").await.unwrap();
    assert!(matches!(
        listener.start("127.0.0.1:0").await,
        Err(ProxyError::AlreadyStarted)
    ));
    listener.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_stop_times_out_with_active_session() {
    let mut harness = ProxyTestHarness::new().await;
    let proxy = harness.proxy_address();

    let mut client = harness.client();
    client.connect(&harness.echo_address()).await.unwrap();
    assert_eq!(harness.active_sessions(), 1);

    let result = harness
        .listener_mut()
        .stop(Duration::from_millis(200))
        .await;
    assert!(matches!(
        result,
        Err(ProxyError::ShutdownTimeout { in_flight: 1 })
    ));

    // New connections are refused
    assert!(TcpStream::connect(proxy.as_str()).await.is_err());

    // The in-flight session is not cut off
    client.write_all(b"still relaying").await.unwrap();
    let mut buf = [0u8; 14];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still relaying");
}

#[tokio::test]
async fn test_stop_after_sessions_finish_is_quick() {
    let mut harness = ProxyTestHarness::new().await;

    let mut client = harness.client();
    client.connect(&harness.echo_address()).await.unwrap();
    client.write_all(b"bye").await.unwrap();
    let mut buf = [0u8; 3];
    client.read_exact(&mut buf).await.unwrap();
    drop(client);

    // Wait for the session to observe the close
    let waited = Instant::now();
    while harness.active_sessions() > 0 {
        assert!(waited.elapsed() < Duration::from_secs(2), "session did not end");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let started = Instant::now();
    harness
        .listener_mut()
        .stop(Duration::from_secs(5))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_session_failure_does_not_stop_listener() {
    let echo = EchoServer::start().await.unwrap();
    let mut listener = ProxyListener::new(config());
    let addr = listener.start("127.0.0.1:0").await.unwrap();

    // Garbage then an immediate close
    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(&[0xff; 3]).await.unwrap();
    drop(raw);

    let mut client = Socks4Client::new(addr.to_string(), "");
    client.connect(&echo.address().to_string()).await.unwrap();
    client.write_all(b"ok").await.unwrap();
    let mut buf = [0u8; 2];
    client.read_exact(&mut buf).await.unwrap();
    drop(client);

    listener.stop(Duration::from_secs(2)).await.unwrap();
}
