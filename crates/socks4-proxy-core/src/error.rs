//! Domain error types for the SOCKS4 proxy.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use std::net::{Ipv4Addr, SocketAddr};

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// An environment override could not be parsed.
    #[error("invalid value for environment variable {name}: {value:?}")]
    InvalidEnvVar { name: &'static str, value: String },

    /// A timeout or size setting is out of range.
    #[error("invalid session setting: {0}")]
    InvalidSession(String),
}

/// Errors produced while encoding or decoding SOCKS4 messages.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Destination could not be split into host and port, or host is not IPv4.
    #[error("invalid destination address: {0}")]
    InvalidAddress(String),

    /// User ID exceeds the 63 byte limit.
    #[error("user id is {0} bytes, at most 63 are allowed")]
    UserIdTooLong(usize),

    /// Fewer than 9 bytes were read for a request.
    #[error("failed to read entire request: got {0} bytes")]
    RequestTooShort(usize),

    /// More than 72 bytes were read for a request.
    #[error("request is too long")]
    RequestTooLong,

    /// Fewer than 8 bytes were read for a reply.
    #[error("failed to read entire reply: got {0} bytes")]
    ReplyTooShort(usize),

    /// More than 8 bytes were read for a reply.
    #[error("reply is too long")]
    ReplyTooLong,

    /// Read from the underlying stream failed.
    #[error("failed to read from connection: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur during proxy operation.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Wire codec failure.
    #[error("protocol error: {0}")]
    Codec(#[from] CodecError),

    /// Message carried an unexpected protocol version.
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// Request command is neither CONNECT nor BIND.
    #[error("invalid request command {0:#04x}")]
    InvalidCommand(u8),

    /// Outbound CONNECT dial failed.
    #[error("failed to dial requested address {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Ephemeral BIND listener could not be opened.
    #[error("failed to open bind listener: {0}")]
    BindListener(#[source] std::io::Error),

    /// BIND accept failed.
    #[error("failed to accept remote: {0}")]
    Accept(#[source] std::io::Error),

    /// Negotiation did not complete before the session deadline.
    #[error("{0} timed out before the session deadline")]
    HandshakeTimeout(&'static str),

    /// BIND peer did not come from the requested address.
    #[error("requested remote {expected} does not match connected remote {actual}")]
    PeerMismatch { expected: Ipv4Addr, actual: SocketAddr },

    /// Writing a reply to the client failed or timed out.
    #[error("failed to write reply to client: {0}")]
    ReplyWrite(#[source] std::io::Error),

    /// A reply could not be written in a single operation.
    #[error("failed to write entire reply: wrote {written} of {expected} bytes")]
    ShortReplyWrite { written: usize, expected: usize },

    /// Relay direction failed with an I/O error.
    #[error("relay {direction} failed: {source}")]
    Relay {
        direction: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Relay direction saw no traffic within the idle timeout.
    #[error("relay {direction} idle for {idle_ms}ms")]
    IdleTimeout { direction: &'static str, idle_ms: u64 },

    /// Server failed to bind its listening socket.
    #[error("failed to listen on {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Server is already running.
    #[error("server already started")]
    AlreadyStarted,

    /// In-flight sessions did not finish before the shutdown deadline.
    #[error("shutdown deadline exceeded with {in_flight} sessions still running")]
    ShutdownTimeout { in_flight: usize },

    /// Proxy answered a client request with a non-success code.
    #[error("received {0} reply from server")]
    Rejected(crate::protocol::ReplyCode),

    /// Client has no negotiated stream yet.
    #[error("client is not connected to a proxy")]
    NotConnected,

    /// BIND callback refused the announced address.
    #[error("bound address callback failed: {0}")]
    BoundCallback(#[source] std::io::Error),
}

impl ProxyError {
    /// Check if this error happened while writing a reply, in which case
    /// no further reply can be attempted.
    #[must_use]
    pub fn is_reply_write(&self) -> bool {
        matches!(self, Self::ReplyWrite(_) | Self::ShortReplyWrite { .. })
    }

    /// Check if this error is a clean end of stream from the peer.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Connection(e)
            | Self::Codec(CodecError::Io(e))
            | Self::Relay { source: e, .. } => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            Self::Codec(CodecError::RequestTooShort(0)) => true,
            _ => false,
        }
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Result type alias for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
