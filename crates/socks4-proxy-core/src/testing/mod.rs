//! Test utilities for the SOCKS4 proxy.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`EchoServer`] - A TCP server that plays the remote end of a session
//! - [`ProxyTestHarness`] - A running proxy plus echo server with short timeouts
//! - [`PipeStream`] - An in-memory [`ProxyStream`](crate::network::ProxyStream)
//!
//! # Example
//!
//! ```rust,ignore
//! use socks4_proxy_core::testing::ProxyTestHarness;
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! #[tokio::test]
//! async fn test_connect() {
//!     let mut harness = ProxyTestHarness::new().await;
//!
//!     let mut client = harness.client();
//!     client.connect(&harness.echo_address()).await.unwrap();
//!     client.write_all(b"ping").await.unwrap();
//!
//!     harness.shutdown().await;
//! }
//! ```

pub mod echo;
pub mod harness;
pub mod pipe;

pub use echo::EchoServer;
pub use harness::{ProxyTestHarness, TestHarnessBuilder};
pub use pipe::PipeStream;
