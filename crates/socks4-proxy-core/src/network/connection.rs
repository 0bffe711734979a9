//! Per-connection session handler.
//!
//! Reads one request from the client, negotiates the remote side (dial for
//! CONNECT, accept for BIND), answers with a reply and then hands both
//! streams to the relay.
//!
//! # Replies
//!
//! Malformed requests and version mismatches are dropped without a reply.
//! Every other failure before the relay starts is answered with exactly one
//! Error reply echoing the requested address. For BIND that Error is the
//! second reply, since the first one (announcing the listening port) has
//! already gone out. A failed reply write ends the session with nothing
//! further sent.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::error::{ProxyError, Result};
use crate::metrics::ProxyMetrics;
use crate::protocol::{consts, Command, Reply, Request};

use super::relay::Relay;
use super::stream::ProxyStream;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitRequest,
    Dispatching,
    /// BIND listener is open and its first reply was sent.
    AwaitPeer,
    Relaying,
    Closed,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitRequest => "await_request",
            Self::Dispatching => "dispatching",
            Self::AwaitPeer => "await_peer",
            Self::Relaying => "relaying",
            Self::Closed => "closed",
        }
    }
}

/// Handles a single client session.
pub struct ConnectionHandler {
    session: Arc<SessionConfig>,
    metrics: Option<Arc<ProxyMetrics>>,
    connection_id: u64,
    state: SessionState,
    /// Replies written to the client so far.
    replies_sent: u8,
    command: Option<Command>,
}

impl ConnectionHandler {
    /// Create a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `session` - Deadlines and relay sizing
    /// * `metrics` - Optional metrics sink
    /// * `connection_id` - Identifier used in log spans
    #[must_use]
    pub fn new(
        session: Arc<SessionConfig>,
        metrics: Option<Arc<ProxyMetrics>>,
        connection_id: u64,
    ) -> Self {
        Self {
            session,
            metrics,
            connection_id,
            state: SessionState::AwaitRequest,
            replies_sent: 0,
            command: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Run the session to completion. The client stream is closed on return.
    ///
    /// # Errors
    ///
    /// Returns the reason the session ended early. A relay that ends on a
    /// clean end of stream is not an error.
    #[instrument(skip(self, client), fields(
        peer = %client.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string()),
        connection_id = self.connection_id
    ))]
    pub async fn handle<S: ProxyStream>(mut self, mut client: S) -> Result<()> {
        info!("handling new client");
        if let Some(metrics) = &self.metrics {
            metrics.inc_active_sessions();
        }

        let result = self.run(&mut client).await;
        self.transition(SessionState::Closed);

        if let Some(metrics) = &self.metrics {
            metrics.dec_active_sessions();
            let command = self.command.map_or("none", Command::as_str);
            metrics.record_session(command, outcome_label(&result));
        }

        result
    }

    async fn run<S: ProxyStream>(&mut self, client: &mut S) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.session.handshake_timeout();

        let request = match timeout_at(deadline, Request::read_from(client)).await {
            Ok(request) => request?,
            Err(_) => return Err(ProxyError::HandshakeTimeout("request read")),
        };
        if request.version() != consts::VERSION {
            return Err(ProxyError::VersionMismatch {
                expected: consts::VERSION,
                actual: request.version(),
            });
        }

        let command = request.command();
        self.command = Some(command);
        debug!(
            command = %command,
            destination = %request.address(),
            user_id = %String::from_utf8_lossy(request.user_id()),
            "received request"
        );
        self.transition(SessionState::Dispatching);

        let (mut remote, negotiated) = match self.dispatch(client, &request, deadline).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                if !e.is_reply_write() {
                    let reply = Reply::error(request.destination());
                    if let Err(reply_err) = self.send_reply(client, &reply, deadline).await {
                        warn!(error = %reply_err, "failed to send error reply");
                    }
                }
                return Err(e);
            }
        };

        self.send_reply(client, &Reply::success(negotiated), deadline)
            .await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_negotiation(command.as_str(), started.elapsed().as_secs_f64());
        }

        self.transition(SessionState::Relaying);
        let (stats, result) = Relay::from_config(&self.session)
            .run(client, &mut remote)
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.record_bytes("client_to_remote", stats.client_to_remote);
            metrics.record_bytes("remote_to_client", stats.remote_to_client);
        }
        info!(
            closed_by = stats.closed_by.as_str(),
            client_to_remote = stats.client_to_remote,
            remote_to_client = stats.remote_to_client,
            "client disconnected"
        );

        result
    }

    async fn dispatch<S: ProxyStream>(
        &mut self,
        client: &mut S,
        request: &Request,
        deadline: Instant,
    ) -> Result<(TcpStream, SocketAddrV4)> {
        let negotiate_deadline = deadline
            .checked_sub(self.session.deadline_headroom())
            .unwrap_or_else(Instant::now);

        match request.command() {
            Command::Connect => {
                let destination = request.destination();
                let remote = match timeout_at(negotiate_deadline, TcpStream::connect(destination)).await {
                    Ok(Ok(remote)) => remote,
                    Ok(Err(source)) => {
                        return Err(ProxyError::Dial {
                            address: request.address(),
                            source,
                        })
                    }
                    Err(_) => {
                        return Err(ProxyError::Dial {
                            address: request.address(),
                            source: std::io::ErrorKind::TimedOut.into(),
                        })
                    }
                };
                debug!(remote = %destination, "dialed remote");
                Ok((remote, destination))
            }
            Command::Bind => self.bind(client, request, deadline, negotiate_deadline).await,
            Command::Invalid => Err(ProxyError::InvalidCommand(request.raw_command())),
        }
    }

    async fn bind<S: ProxyStream>(
        &mut self,
        client: &mut S,
        request: &Request,
        deadline: Instant,
        accept_deadline: Instant,
    ) -> Result<(TcpStream, SocketAddrV4)> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(ProxyError::BindListener)?;
        let port = listener
            .local_addr()
            .map_err(ProxyError::BindListener)?
            .port();

        let announced = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        self.send_reply(client, &Reply::success(announced), deadline)
            .await?;
        self.transition(SessionState::AwaitPeer);

        let (remote, peer) = match timeout_at(accept_deadline, listener.accept()).await {
            Ok(accepted) => accepted.map_err(ProxyError::Accept)?,
            Err(_) => return Err(ProxyError::HandshakeTimeout("bind accept")),
        };
        // Only one peer is accepted per request
        drop(listener);

        match peer {
            SocketAddr::V4(addr) if *addr.ip() == request.ip() => {
                debug!(peer = %addr, "accepted bind peer");
                Ok((remote, addr))
            }
            actual => Err(ProxyError::PeerMismatch {
                expected: request.ip(),
                actual,
            }),
        }
    }

    /// Write one reply with a single write call.
    async fn send_reply<S: ProxyStream>(
        &mut self,
        client: &mut S,
        reply: &Reply,
        deadline: Instant,
    ) -> Result<()> {
        let body = reply.to_bytes();

        let written = match timeout_at(deadline, client.write(&body)).await {
            Ok(written) => written.map_err(ProxyError::ReplyWrite)?,
            Err(_) => {
                return Err(ProxyError::ReplyWrite(
                    std::io::ErrorKind::TimedOut.into(),
                ))
            }
        };
        if written != body.len() {
            return Err(ProxyError::ShortReplyWrite {
                written,
                expected: body.len(),
            });
        }
        match timeout_at(deadline, client.flush()).await {
            Ok(flushed) => flushed.map_err(ProxyError::ReplyWrite)?,
            Err(_) => {
                return Err(ProxyError::ReplyWrite(
                    std::io::ErrorKind::TimedOut.into(),
                ))
            }
        }

        self.replies_sent += 1;
        debug!(
            code = %reply.code(),
            address = %reply.address(),
            reply = self.replies_sent,
            "sent reply"
        );
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = self.state.as_str(), to = next.as_str(), "session state");
        self.state = next;
    }
}

/// Short metric label for how a session ended.
fn outcome_label(result: &Result<()>) -> &'static str {
    match result {
        Ok(()) => "relayed",
        Err(e) => match e {
            ProxyError::Codec(_) | ProxyError::Connection(_) => "bad_request",
            ProxyError::VersionMismatch { .. } => "version_mismatch",
            ProxyError::InvalidCommand(_) => "invalid_command",
            ProxyError::Dial { .. } => "dial_failed",
            ProxyError::BindListener(_) | ProxyError::Accept(_) => "bind_failed",
            ProxyError::PeerMismatch { .. } => "peer_mismatch",
            ProxyError::HandshakeTimeout(_) => "handshake_timeout",
            ProxyError::ReplyWrite(_) | ProxyError::ShortReplyWrite { .. } => "reply_failed",
            ProxyError::IdleTimeout { .. } => "idle_timeout",
            ProxyError::Relay { .. } => "relay_error",
            _ => "error",
        },
    }
}
