//! Network layer for the SOCKS4 proxy.
//!
//! This module provides:
//! - TCP listener with bounded graceful shutdown
//! - Connection handler driving one session from request to relay
//! - Relay engine pumping bytes between client and remote
//! - Stream abstraction shared by TCP sockets and in-memory pipes

pub mod connection;
pub mod listener;
pub mod relay;
pub mod stream;

pub use connection::{ConnectionHandler, SessionState};
pub use listener::ProxyListener;
pub use relay::{Direction, Relay, RelayStats};
pub use stream::ProxyStream;
