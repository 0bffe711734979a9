//! Configuration types for the SOCKS4 proxy.
//!
//! Configuration is loaded from YAML files, optionally overridden from the
//! environment, and validated before use.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Environment variable overriding [`LoggingConfig::level`].
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
/// Environment variable overriding the host part of [`ListenConfig::address`].
pub const ENV_LISTEN_IP: &str = "LISTEN_IP";
/// Environment variable overriding the port part of [`ListenConfig::address`].
pub const ENV_LISTEN_PORT: &str = "LISTEN_PORT";

/// Root configuration for the proxy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// TCP listener configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Per-session deadlines and buffer sizing.
    #[serde(default)]
    pub session: SessionConfig,

    /// Graceful shutdown configuration.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TCP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address to bind to, e.g., "0.0.0.0:1080".
    ///
    /// Supports environment variable expansion: "${SOCKS_LISTEN}"
    #[serde(default = "default_listen_address")]
    pub address: String,
}

/// Session timing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Absolute limit on reading the request and negotiating the remote.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Dial and BIND accept must finish this long before the handshake
    /// deadline so a reply can still be sent.
    #[serde(default = "default_deadline_headroom_ms")]
    pub deadline_headroom_ms: u64,

    /// Sliding idle timeout for each relay direction.
    #[serde(default = "default_relay_idle_timeout_ms")]
    pub relay_idle_timeout_ms: u64,

    /// Read buffer size for each relay direction.
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    /// How long to wait for in-flight sessions after the listener closes.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to enable the metrics endpoint.
    #[serde(default)]
    pub enabled: bool,

    /// Address for the metrics HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

// Default value functions

fn default_listen_address() -> String {
    "0.0.0.0:1080".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    120_000
}

fn default_deadline_headroom_ms() -> u64 {
    1_000
}

fn default_relay_idle_timeout_ms() -> u64 {
    30_000
}

fn default_relay_buffer_size() -> usize {
    64 * 1024
}

fn default_grace_period_ms() -> u64 {
    15_000
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            deadline_headroom_ms: default_deadline_headroom_ms(),
            relay_idle_timeout_ms: default_relay_idle_timeout_ms(),
            relay_buffer_size: default_relay_buffer_size(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ListenConfig {
    /// Listen address with environment variables expanded.
    #[must_use]
    pub fn address(&self) -> String {
        expand_env_vars(&self.address)
    }

    /// Replace the host and/or port of the listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if the current address has no `host:port` shape.
    pub fn override_endpoint(&mut self, ip: Option<IpAddr>, port: Option<u16>) -> ConfigResult<()> {
        let current = self.address();
        let (host, current_port) = current
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidAddress(current.clone()))?;

        let host = match ip {
            Some(IpAddr::V6(v6)) => format!("[{v6}]"),
            Some(ip) => ip.to_string(),
            None => host.to_string(),
        };
        let port = port.map_or_else(|| current_port.to_string(), |p| p.to_string());
        self.address = format!("{host}:{port}");
        Ok(())
    }
}

impl SessionConfig {
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[must_use]
    pub fn deadline_headroom(&self) -> Duration {
        Duration::from_millis(self.deadline_headroom_ms)
    }

    #[must_use]
    pub fn relay_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_idle_timeout_ms)
    }

    /// Validate the session configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `deadline_headroom_ms` is not below `handshake_timeout_ms`
    /// - `relay_idle_timeout_ms` is zero
    /// - `relay_buffer_size` is zero
    pub fn validate(&self) -> ConfigResult<()> {
        if self.deadline_headroom_ms >= self.handshake_timeout_ms {
            return Err(ConfigError::InvalidSession(format!(
                "deadline_headroom_ms ({}) must be below handshake_timeout_ms ({})",
                self.deadline_headroom_ms, self.handshake_timeout_ms
            )));
        }
        if self.relay_idle_timeout_ms == 0 {
            return Err(ConfigError::InvalidSession(
                "relay_idle_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.relay_buffer_size == 0 {
            return Err(ConfigError::InvalidSession(
                "relay_buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl ShutdownConfig {
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

// Configuration loading and validation

impl ProxyConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LOG_LEVEL`, `LISTEN_IP` and `LISTEN_PORT` from the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_IP` is not an IP address or
    /// `LISTEN_PORT` is not a port number.
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`ProxyConfig::apply_env_overrides`].
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }

        let ip = lookup(ENV_LISTEN_IP)
            .map(|value| {
                value.parse::<IpAddr>().map_err(|_| ConfigError::InvalidEnvVar {
                    name: ENV_LISTEN_IP,
                    value,
                })
            })
            .transpose()?;
        let port = lookup(ENV_LISTEN_PORT)
            .map(|value| {
                value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvVar {
                    name: ENV_LISTEN_PORT,
                    value,
                })
            })
            .transpose()?;

        if ip.is_some() || port.is_some() {
            self.listen.override_endpoint(ip, port)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        self.session.validate()
    }
}
