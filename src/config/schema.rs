//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from the JSON config file.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FortitudeConfig {
    /// Distribution algorithm used for the read and write pools.
    pub algorithm: Algorithm,

    /// Static-content (read) backends.
    pub read_srv: ServerList,

    /// Write backends.
    pub write_srv: ServerList,

    /// WebSocket backend (exactly one).
    pub ws_srv: ServerList,

    /// Ordered path rules; a match routes to the read pool.
    pub read_rules: Vec<String>,

    /// Bind address for the listener.
    pub http_bind: String,

    /// Listener port.
    pub http_port: u16,

    /// Serve over TLS.
    pub secure: bool,

    /// Path to certificate file (PEM).
    pub secure_cert: Option<String>,

    /// Path to private key file (PEM).
    pub secure_key: Option<String>,

    /// Cookie carrying the sticky-session key.
    pub session_cookie: String,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Response compression.
    pub compression: CompressionConfig,

    /// WebSocket bridge settings.
    pub websocket: WebSocketConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Watch the config file and reload on change.
    pub watch: bool,
}

impl Default for FortitudeConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            read_srv: ServerList::default(),
            write_srv: ServerList::default(),
            ws_srv: ServerList::default(),
            read_rules: Vec::new(),
            http_bind: "0.0.0.0".to_string(),
            http_port: 8080,
            secure: false,
            secure_cert: None,
            secure_key: None,
            session_cookie: "session".to_string(),
            timeouts: TimeoutConfig::default(),
            compression: CompressionConfig::default(),
            websocket: WebSocketConfig::default(),
            observability: ObservabilityConfig::default(),
            watch: false,
        }
    }
}

impl FortitudeConfig {
    /// `host:port` the listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.http_bind, self.http_port)
    }
}

/// Backend distribution algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Uniform random choice.
    Random,
    /// Round-robin over the pool.
    #[default]
    Robin,
    /// Sticky sessions keyed by cookie.
    Session,
    /// Least active connections.
    Availability,
}

impl Algorithm {
    /// Whether selections must be released when the request completes.
    pub fn tracks_connections(self) -> bool {
        matches!(self, Algorithm::Availability)
    }

    /// Whether selection consults the session key.
    pub fn uses_session(self) -> bool {
        matches!(self, Algorithm::Session)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Random => "random",
            Algorithm::Robin => "robin",
            Algorithm::Session => "session",
            Algorithm::Availability => "availability",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend address as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl ServerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Either a single server object or an array of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ServerList {
    One(ServerAddr),
    Many(Vec<ServerAddr>),
}

impl Default for ServerList {
    fn default() -> Self {
        ServerList::Many(Vec::new())
    }
}

impl ServerList {
    pub fn as_slice(&self) -> &[ServerAddr] {
        match self {
            ServerList::One(addr) => std::slice::from_ref(addr),
            ServerList::Many(addrs) => addrs,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl From<Vec<ServerAddr>> for ServerList {
    fn from(addrs: Vec<ServerAddr>) -> Self {
        ServerList::Many(addrs)
    }
}

impl From<ServerAddr> for ServerList {
    fn from(addr: ServerAddr) -> Self {
        ServerList::One(addr)
    }
}

/// Timeout configuration for backend operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Backend response timeout (until headers arrive) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Gzip compression of relayed response bodies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,

    /// Bodies smaller than this many bytes are passed through.
    pub min_size: u16,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 1024,
        }
    }
}

/// WebSocket bridge configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: u64,

    /// How long to wait for the surviving side to close after the other
    /// side went away, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            close_timeout_ms: 2000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_array_servers() {
        let raw = r#"{
            "algorithm": "availability",
            "read_srv": [{"host": "10.0.0.1", "port": 80}, {"host": "10.0.0.2", "port": 80}],
            "write_srv": {"host": "10.0.0.3", "port": 8000},
            "ws_srv": {"host": "10.0.0.4", "port": 9000},
            "read_rules": ["/static/.*"],
            "http_port": 8888
        }"#;

        let config: FortitudeConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.algorithm, Algorithm::Availability);
        assert_eq!(config.read_srv.len(), 2);
        assert_eq!(config.write_srv.as_slice(), &[ServerAddr::new("10.0.0.3", 8000)]);
        assert_eq!(config.ws_srv.len(), 1);
        assert_eq!(config.bind_address(), "0.0.0.0:8888");
        assert_eq!(config.session_cookie, "session");
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let raw = r#"{"algorithm": "weighted"}"#;
        assert!(serde_json::from_str::<FortitudeConfig>(raw).is_err());
    }

    #[test]
    fn algorithm_flags() {
        assert!(Algorithm::Availability.tracks_connections());
        assert!(!Algorithm::Robin.tracks_connections());
        assert!(Algorithm::Session.uses_session());
        assert_eq!(Algorithm::Robin.to_string(), "robin");
    }
}
