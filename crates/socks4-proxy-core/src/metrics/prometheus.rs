//! Prometheus metrics for the SOCKS4 proxy.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Proxy metrics collection.
pub struct ProxyMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Connections accepted by the listener.
    pub connections_accepted: IntCounter,

    /// Sessions currently negotiating or relaying.
    pub active_sessions: IntGauge,

    /// Finished sessions by command and outcome.
    pub sessions_total: IntCounterVec,

    /// Time from request read to success reply, by command.
    pub negotiation_duration_seconds: HistogramVec,

    /// Bytes relayed by direction.
    pub bytes_relayed: IntCounterVec,
}

impl ProxyMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_accepted = IntCounter::new(
            "socks4_proxy_connections_accepted_total",
            "Total number of client connections accepted",
        )
        .expect("metric creation should succeed");

        let active_sessions = IntGauge::new(
            "socks4_proxy_active_sessions",
            "Current number of client sessions being handled",
        )
        .expect("metric creation should succeed");

        let sessions_total = IntCounterVec::new(
            Opts::new(
                "socks4_proxy_sessions_total",
                "Total number of finished sessions by command and outcome",
            ),
            &["command", "outcome"],
        )
        .expect("metric creation should succeed");

        let negotiation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "socks4_proxy_negotiation_duration_seconds",
                "Time from request to success reply in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0, 120.0,
            ]),
            &["command"],
        )
        .expect("metric creation should succeed");

        let bytes_relayed = IntCounterVec::new(
            Opts::new(
                "socks4_proxy_bytes_relayed_total",
                "Total bytes relayed by direction",
            ),
            &["direction"],
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(connections_accepted.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(sessions_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(negotiation_duration_seconds.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(bytes_relayed.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            connections_accepted,
            active_sessions,
            sessions_total,
            negotiation_duration_seconds,
            bytes_relayed,
        }
    }

    pub fn record_connection(&self) {
        self.connections_accepted.inc();
    }

    pub fn inc_active_sessions(&self) {
        self.active_sessions.inc();
    }

    pub fn dec_active_sessions(&self) {
        self.active_sessions.dec();
    }

    /// Record a finished session. `outcome` is a short label such as
    /// `"relayed"` or `"dial_failed"`.
    pub fn record_session(&self, command: &str, outcome: &str) {
        self.sessions_total
            .with_label_values(&[command, outcome])
            .inc();
    }

    pub fn record_negotiation(&self, command: &str, duration_seconds: f64) {
        self.negotiation_duration_seconds
            .with_label_values(&[command])
            .observe(duration_seconds);
    }

    pub fn record_bytes(&self, direction: &str, bytes: u64) {
        self.bytes_relayed
            .with_label_values(&[direction])
            .inc_by(bytes);
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}
