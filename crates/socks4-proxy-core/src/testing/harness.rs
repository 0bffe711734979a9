//! Test harness for integration testing of the SOCKS4 proxy.
//!
//! Provides a complete test environment with:
//! - A running [`ProxyListener`] on an ephemeral loopback port
//! - An [`EchoServer`] to use as the CONNECT destination
//! - Helper methods for opening proxied and raw client connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::client::Socks4Client;
use crate::config::{ProxyConfig, SessionConfig};
use crate::error::Result;
use crate::metrics::ProxyMetrics;
use crate::network::ProxyListener;

use super::echo::EchoServer;

/// Test harness for integration testing.
pub struct ProxyTestHarness {
    listener: ProxyListener,
    proxy_addr: SocketAddr,
    echo: EchoServer,
    /// Metrics shared with the running listener.
    pub metrics: Arc<ProxyMetrics>,
    /// Test configuration
    pub config: ProxyConfig,
}

impl ProxyTestHarness {
    /// Create a new test harness with default test timeouts.
    ///
    /// Default config: 5s handshake, 5s relay idle, 1s shutdown grace.
    pub async fn new() -> Self {
        TestHarnessBuilder::new().build().await
    }

    /// Create a new test harness with custom session settings.
    ///
    /// # Panics
    ///
    /// Panics if the echo server or the proxy cannot be started.
    pub async fn with_session(session: SessionConfig) -> Self {
        let mut config = ProxyConfig::default();
        config.listen.address = "127.0.0.1:0".to_string();
        config.session = session;
        config.shutdown.grace_period_ms = 1000;
        Self::with_config(config).await
    }

    async fn with_config(config: ProxyConfig) -> Self {
        let echo = EchoServer::start()
            .await
            .expect("Failed to start echo server");

        let metrics = Arc::new(ProxyMetrics::new());
        let mut listener =
            ProxyListener::new(config.clone()).with_metrics(Arc::clone(&metrics));
        let proxy_addr = listener
            .start(&config.listen.address)
            .await
            .expect("Failed to start proxy");

        Self {
            listener,
            proxy_addr,
            echo,
            metrics,
            config,
        }
    }

    /// Proxy address as `ip:port`.
    #[must_use]
    pub fn proxy_address(&self) -> String {
        self.proxy_addr.to_string()
    }

    /// Echo server address as `ip:port`.
    #[must_use]
    pub fn echo_address(&self) -> String {
        self.echo.address().to_string()
    }

    /// Get the echo server.
    #[must_use]
    pub fn echo(&self) -> &EchoServer {
        &self.echo
    }

    /// A client pointed at this proxy with an empty user id.
    #[must_use]
    pub fn client(&self) -> Socks4Client {
        Socks4Client::new(self.proxy_address(), "")
    }

    /// Open a plain TCP connection to the proxy, for sending hand-built bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy cannot be reached.
    pub async fn raw_connection(&self) -> std::io::Result<TcpStream> {
        TcpStream::connect(self.proxy_addr).await
    }

    /// Number of sessions the proxy is still handling.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.listener.active_sessions()
    }

    /// Get the running listener.
    pub fn listener_mut(&mut self) -> &mut ProxyListener {
        &mut self.listener
    }

    /// Stop the proxy with the configured grace period and stop the echo server.
    ///
    /// # Errors
    ///
    /// Returns an error if sessions outlive the grace period.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.echo.stop();
        self.listener.stop(self.config.shutdown.grace_period()).await
    }
}

/// Builder for creating test harness with specific timeouts.
pub struct TestHarnessBuilder {
    session: SessionConfig,
}

impl TestHarnessBuilder {
    /// Create a new builder with short test timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: SessionConfig {
                handshake_timeout_ms: 5000,
                deadline_headroom_ms: 500,
                relay_idle_timeout_ms: 5000,
                ..SessionConfig::default()
            },
        }
    }

    /// Set the request and negotiation deadline.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.session.handshake_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the headroom kept between dial/accept and the negotiation deadline.
    #[must_use]
    pub fn deadline_headroom(mut self, headroom: Duration) -> Self {
        self.session.deadline_headroom_ms = duration_ms(headroom);
        self
    }

    /// Set the relay idle timeout.
    #[must_use]
    pub fn relay_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session.relay_idle_timeout_ms = duration_ms(timeout);
        self
    }

    /// Build the test harness.
    pub async fn build(self) -> ProxyTestHarness {
        ProxyTestHarness::with_session(self.session).await
    }
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
