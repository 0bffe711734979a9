//! SOCKS4 Proxy Core Library
//!
//! This library provides a SOCKS4 proxy server and a matching client. The
//! server accepts CONNECT and BIND requests, negotiates the remote side and
//! relays bytes in both directions until either side goes away or stays
//! idle for too long.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Request/reply wire codec
//! - [`network`] - TCP listener, session handler and relay engine
//! - [`client`] - Client that negotiates through a proxy
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`metrics`] - Prometheus metrics collection
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use socks4_proxy_core::{ProxyConfig, ProxyListener};
//!
//! let config = ProxyConfig::from_file("config.yaml")?;
//! let endpoint = config.listen.address();
//!
//! let mut listener = ProxyListener::new(config);
//! listener.start(&endpoint).await?;
//!
//! // ...
//!
//! listener.stop(Duration::from_secs(15)).await?;
//! ```

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod network;
pub mod protocol;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use client::Socks4Client;
pub use config::ProxyConfig;
pub use error::{CodecError, ConfigError, ProxyError, Result};
pub use metrics::ProxyMetrics;
pub use network::{ConnectionHandler, ProxyListener, ProxyStream, Relay};
pub use protocol::{Command, Reply, ReplyCode, Request};
