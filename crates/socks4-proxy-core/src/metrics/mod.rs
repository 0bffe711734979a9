//! Metrics collection for the SOCKS4 proxy.
//!
//! Provides Prometheus-compatible counters and gauges for accepted
//! connections, negotiated sessions and relayed traffic.

pub mod prometheus;

pub use prometheus::ProxyMetrics;
