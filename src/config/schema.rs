//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default port the proxy listens on.
pub const DEFAULT_PORT: u16 = 8181;

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Access policy (probe header, client allowlist, credentials).
    pub policy: PolicyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8181" or ":8181").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Upper bound on the size of a request line plus headers.
    pub max_header_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            max_connections: 10_000,
            max_header_bytes: 64 * 1024,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream dial timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for a client to send its request head, in seconds.
    pub header_read_secs: u64,

    /// Time allowed for an upstream to return a response head, in seconds.
    pub request_secs: u64,

    /// Optional hard limit on a tunnel's lifetime, in seconds.
    pub tunnel_secs: Option<u64>,

    /// How long shutdown waits for in-flight connections, in seconds.
    pub drain_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn header_read(&self) -> Duration {
        Duration::from_secs(self.header_read_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn tunnel(&self) -> Option<Duration> {
        self.tunnel_secs.map(Duration::from_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            header_read_secs: 30,
            request_secs: 60,
            tunnel_secs: None,
            drain_secs: 10,
        }
    }
}

/// Access policy configuration.
///
/// Every concern is off by default; an empty section means every request is allowed.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PolicyConfig {
    /// Header whose presence marks a liveness probe (e.g. "X-Ping").
    pub probe_header: Option<String>,

    /// Client IPs allowed to use the proxy. Empty means any client.
    pub allowed_ips: Vec<String>,

    /// Basic credentials required in `Proxy-Authorization`.
    pub auth: Option<AuthConfig>,
}

impl PolicyConfig {
    /// True when at least one policy concern is switched on.
    pub fn is_enabled(&self) -> bool {
        self.probe_header.is_some() || !self.allowed_ips.is_empty() || self.auth.is_some()
    }
}

/// Proxy authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,

    /// Realm advertised in the `Proxy-Authenticate` challenge.
    #[serde(default = "default_realm")]
    pub realm: String,
}

pub fn default_realm() -> String {
    "hide".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
