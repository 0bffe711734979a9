//! TCP listener for accepting SOCKS4 client connections.
//!
//! The listener accepts connections and spawns a task for each one,
//! delegating to the connection handler. Stopping closes the listening
//! socket first and then waits, bounded, for in-flight sessions to end on
//! their own. Sessions are never cancelled by a stop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ProxyConfig, SessionConfig};
use crate::error::{ProxyError, Result};
use crate::metrics::ProxyMetrics;

use super::connection::ConnectionHandler;

/// TCP listener that accepts client connections.
pub struct ProxyListener {
    config: Arc<ProxyConfig>,
    metrics: Option<Arc<ProxyMetrics>>,
    shutdown_tx: broadcast::Sender<()>,
    sessions: TaskTracker,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

impl ProxyListener {
    /// Create a new proxy listener.
    #[must_use]
    pub fn new(config: ProxyConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            metrics: None,
            shutdown_tx,
            sessions: TaskTracker::new(),
            local_addr: None,
            accept_task: None,
        }
    }

    /// Attach a metrics sink shared with every session.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ProxyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get a shutdown handle that stops the accept loop.
    ///
    /// Sending on it closes the listening socket without waiting for
    /// sessions; use [`ProxyListener::stop`] for a bounded drain.
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Get the current number of sessions being handled.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Bound address, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.accept_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Bind `endpoint` and start accepting connections in the background.
    ///
    /// An endpoint of the form `:port` listens on all IPv4 interfaces.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::AlreadyStarted`] if the listener is running and
    /// [`ProxyError::Bind`] if the endpoint cannot be bound.
    #[instrument(skip(self))]
    pub async fn start(&mut self, endpoint: &str) -> Result<SocketAddr> {
        if self.accept_task.is_some() {
            return Err(ProxyError::AlreadyStarted);
        }

        let endpoint = if endpoint.starts_with(':') {
            format!("0.0.0.0{endpoint}")
        } else {
            endpoint.to_string()
        };

        let listener = TcpListener::bind(&endpoint)
            .await
            .map_err(|source| ProxyError::Bind {
                endpoint: endpoint.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ProxyError::Bind {
            endpoint: endpoint.clone(),
            source,
        })?;
        info!(address = %local_addr, "proxy listening");

        self.sessions.reopen();
        let accept_loop = AcceptLoop {
            listener,
            session: Arc::new(self.config.session.clone()),
            metrics: self.metrics.clone(),
            sessions: self.sessions.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
            next_id: AtomicU64::new(1),
        };
        self.accept_task = Some(tokio::spawn(accept_loop.run()));
        self.local_addr = Some(local_addr);

        Ok(local_addr)
    }

    /// Stop accepting and wait up to `grace` for in-flight sessions.
    ///
    /// Calling this on a listener that was never started is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ShutdownTimeout`] if sessions are still running
    /// when `grace` elapses. Those sessions keep running in the background.
    #[instrument(skip(self))]
    pub async fn stop(&mut self, grace: Duration) -> Result<()> {
        let Some(accept_task) = self.accept_task.take() else {
            return Ok(());
        };

        let _ = self.shutdown_tx.send(());
        // The listening socket is dropped when the accept loop returns
        if let Err(e) = accept_task.await {
            warn!(error = %e, "accept loop panicked");
        }

        self.sessions.close();
        let in_flight = self.sessions.len();
        if in_flight > 0 {
            info!(in_flight, "waiting for sessions to finish");
        }

        match tokio::time::timeout(grace, self.sessions.wait()).await {
            Ok(()) => {
                info!("proxy stopped");
                Ok(())
            }
            Err(_) => {
                let in_flight = self.sessions.len();
                warn!(in_flight, "shutdown deadline exceeded");
                Err(ProxyError::ShutdownTimeout { in_flight })
            }
        }
    }
}

struct AcceptLoop {
    listener: TcpListener,
    session: Arc<SessionConfig>,
    metrics: Option<Arc<ProxyMetrics>>,
    sessions: TaskTracker,
    shutdown_rx: broadcast::Receiver<()>,
    next_id: AtomicU64,
}

impl AcceptLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => self.spawn_session(socket, addr),
                        Err(e) => {
                            error!(error = %e, "accept error, listener stopping");
                            break;
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
    }

    fn spawn_session(&self, socket: tokio::net::TcpStream, addr: SocketAddr) {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(peer = %addr, connection_id, "accepted connection");
        if let Some(metrics) = &self.metrics {
            metrics.record_connection();
        }

        let handler = ConnectionHandler::new(
            Arc::clone(&self.session),
            self.metrics.clone(),
            connection_id,
        );

        self.sessions.spawn(async move {
            if let Err(e) = handler.handle(socket).await {
                if e.is_disconnect() {
                    debug!(peer = %addr, "client disconnected");
                } else {
                    error!(peer = %addr, error = %e, "session failed");
                }
            }
        });
    }
}
