//! Transport Configuration
//!
//! Configuration types for selecting a transport and locating the endpoint.

use serde::{Deserialize, Serialize};

use super::frame::MAX_FRAME_SIZE;

/// Default endpoint host
pub const DEFAULT_HOST: &str = "localhost";

/// Default endpoint port (the reference server listens on 8000)
pub const DEFAULT_PORT: u16 = 8000;

/// Default endpoint path
pub const DEFAULT_PATH: &str = "/ws/stream";

/// Transport type selection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// In-memory channels (tests and demos)
    ///
    /// Requires the server half, so it cannot be created from configuration
    /// alone; use `InProcessConnector::new_pair()`.
    InProcess,

    /// WebSocket (the reference deployment)
    #[default]
    WebSocket,
}

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Which transport to use
    pub transport: TransportType,

    /// Endpoint host name or address
    pub host: String,

    /// Endpoint port
    pub port: u16,

    /// Endpoint path (leading `/` optional)
    pub path: String,

    /// Use TLS (`wss://`)
    pub secure: bool,

    /// Connection timeout in milliseconds
    ///
    /// How long to wait for the connection to open before reporting a
    /// transport error.
    pub connect_timeout_ms: u64,

    /// Capacity of the transport event channel
    pub channel_capacity: usize,

    /// Largest inbound frame accepted, in bytes
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport: TransportType::default(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            secure: false,
            connect_timeout_ms: 5000,
            channel_capacity: 256,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl TransportConfig {
    /// Configuration for the in-process transport
    #[must_use]
    pub fn in_process() -> Self {
        Self {
            transport: TransportType::InProcess,
            ..Default::default()
        }
    }

    /// Configuration for a WebSocket endpoint
    #[must_use]
    pub fn websocket(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: TransportType::WebSocket,
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Apply `STREAMER_*` variables read through `lookup`
    ///
    /// Variables:
    /// - `STREAMER_TRANSPORT`: "websocket"/"ws" or "inprocess"
    /// - `STREAMER_HOST`: Endpoint host
    /// - `STREAMER_PORT`: Endpoint port
    /// - `STREAMER_PATH`: Endpoint path
    /// - `STREAMER_SECURE`: "1" or "true" for `wss://`
    /// - `STREAMER_CONNECT_TIMEOUT`: Connection timeout in ms
    ///
    /// Returns `true` if any value was taken from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> bool {
        let mut applied = false;

        if let Some(kind) = lookup("STREAMER_TRANSPORT") {
            match kind.to_lowercase().as_str() {
                "websocket" | "ws" => {
                    self.transport = TransportType::WebSocket;
                    applied = true;
                }
                "inprocess" | "in-process" => {
                    self.transport = TransportType::InProcess;
                    applied = true;
                }
                other => tracing::warn!(value = other, "Ignoring unknown STREAMER_TRANSPORT"),
            }
        }
        if let Some(host) = lookup("STREAMER_HOST") {
            self.host = host;
            applied = true;
        }
        if let Some(port) = lookup("STREAMER_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
            applied = true;
        }
        if let Some(path) = lookup("STREAMER_PATH") {
            self.path = path;
            applied = true;
        }
        if let Some(secure) = lookup("STREAMER_SECURE") {
            self.secure = secure == "1" || secure.to_lowercase() == "true";
            applied = true;
        }
        if let Some(ms) = lookup("STREAMER_CONNECT_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.connect_timeout_ms = ms;
            applied = true;
        }

        applied
    }

    /// The endpoint URL
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = self.path.trim_start_matches('/');
        format!("{scheme}://{}:{}/{path}", self.host, self.port)
    }

    /// Check if this is an in-process configuration
    #[must_use]
    pub fn is_in_process(&self) -> bool {
        matches!(self.transport, TransportType::InProcess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_url() {
        let config = TransportConfig::default();
        assert_eq!(config.url(), "ws://localhost:8000/ws/stream");
        assert_eq!(config.transport, TransportType::WebSocket);
    }

    #[test]
    fn test_secure_url_normalises_path() {
        let config = TransportConfig {
            secure: true,
            path: "chat".to_string(),
            ..TransportConfig::websocket("example.com", 443)
        };
        assert_eq!(config.url(), "wss://example.com:443/chat");
    }

    #[test]
    fn test_apply_env() {
        let vars: HashMap<&str, &str> = [
            ("STREAMER_HOST", "10.0.0.2"),
            ("STREAMER_PORT", "9001"),
            ("STREAMER_SECURE", "true"),
            ("STREAMER_CONNECT_TIMEOUT", "250"),
        ]
        .into_iter()
        .collect();

        let mut config = TransportConfig::default();
        assert!(config.apply_env(|k| vars.get(k).map(|v| v.to_string())));
        assert_eq!(config.url(), "wss://10.0.0.2:9001/ws/stream");
        assert_eq!(config.connect_timeout_ms, 250);
    }

    #[test]
    fn test_apply_env_ignores_garbage() {
        let mut config = TransportConfig::default();
        let applied = config.apply_env(|k| (k == "STREAMER_PORT").then(|| "nope".to_string()));
        assert!(!applied);
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
