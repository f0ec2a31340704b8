//! TOML Configuration File Support
//!
//! Centralized configuration loading for the client, supporting a TOML file at
//! `~/.config/streamer/client.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/streamer/client.toml` (typically `~/.config/streamer/client.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [endpoint]
//! host = "localhost"
//! port = 8000
//! path = "/ws/stream"
//! secure = false
//! connect_timeout_ms = 5000
//!
//! [conversation]
//! provisional_ms = 200
//! fragment_spacing = "preserve"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::{ConversationLog, FragmentSpacing, DEFAULT_PROVISIONAL};
use crate::transport::config::{TransportConfig, TransportType};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Endpoint section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointToml {
    /// Transport kind ("websocket" or "inprocess")
    pub transport: Option<TransportType>,

    /// Endpoint host
    pub host: Option<String>,

    /// Endpoint port
    pub port: Option<u16>,

    /// Endpoint path
    pub path: Option<String>,

    /// Use `wss://`
    pub secure: Option<bool>,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Capacity of the transport event channel
    pub channel_capacity: Option<usize>,

    /// Largest inbound frame accepted, in bytes
    pub max_frame_size: Option<usize>,
}

/// Conversation section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationToml {
    /// How long new messages stay provisional, in milliseconds
    pub provisional_ms: Option<u64>,

    /// "preserve" or "trim"
    pub fragment_spacing: Option<FragmentSpacing>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Endpoint settings
    pub endpoint: EndpointToml,

    /// Conversation settings
    pub conversation: ConversationToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved client configuration
#[derive(Clone, Debug)]
pub struct ClientConfigFile {
    /// Transport and endpoint settings
    pub transport: TransportConfig,

    /// How long new messages stay provisional, in milliseconds
    pub provisional_ms: u64,

    /// Continuation fragment handling
    pub fragment_spacing: FragmentSpacing,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ClientConfigFile {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            provisional_ms: DEFAULT_PROVISIONAL.as_millis() as u64,
            fragment_spacing: FragmentSpacing::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfigFile {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, but talking to an in-process server
    #[must_use]
    pub fn in_process() -> Self {
        Self {
            transport: TransportConfig::in_process(),
            ..Self::default()
        }
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Use `transport` for the endpoint
    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Keep new messages provisional for `ms` milliseconds
    #[must_use]
    pub fn with_provisional_ms(mut self, ms: u64) -> Self {
        self.provisional_ms = ms;
        self
    }

    /// Set continuation fragment handling
    #[must_use]
    pub fn with_fragment_spacing(mut self, spacing: FragmentSpacing) -> Self {
        self.fragment_spacing = spacing;
        self
    }

    /// Provisional period as a duration
    #[must_use]
    pub fn provisional_for(&self) -> Duration {
        Duration::from_millis(self.provisional_ms)
    }

    /// An empty conversation log configured from these settings
    #[must_use]
    pub fn conversation_log(&self) -> ConversationLog {
        ConversationLog::new(self.provisional_for(), self.fragment_spacing)
    }

    /// Check the values that would otherwise fail later at runtime
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.host.trim().is_empty() {
            return Err(ConfigError::ValidationError("host must not be empty".into()));
        }
        if self.transport.port == 0 {
            return Err(ConfigError::ValidationError("port must not be 0".into()));
        }
        if self.transport.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if self.transport.max_frame_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_frame_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/streamer/client.toml` or
/// `~/.config/streamer/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("streamer").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// resulting values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<ClientConfigFile, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// If `path` is `None`, only defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfigFile, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment variables through `lookup`
///
/// # Errors
///
/// See [`load_config_from_path`].
pub fn load_config_with_env(
    path: Option<PathBuf>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ClientConfigFile, ConfigError> {
    let mut config = ClientConfigFile::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, lookup);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfigFile, toml: &ClientToml) {
    let endpoint = &toml.endpoint;
    if let Some(ref transport) = endpoint.transport {
        config.transport.transport = transport.clone();
    }
    if let Some(ref host) = endpoint.host {
        config.transport.host = host.clone();
    }
    if let Some(port) = endpoint.port {
        config.transport.port = port;
    }
    if let Some(ref path) = endpoint.path {
        config.transport.path = path.clone();
    }
    if let Some(secure) = endpoint.secure {
        config.transport.secure = secure;
    }
    if let Some(timeout) = endpoint.connect_timeout_ms {
        config.transport.connect_timeout_ms = timeout;
    }
    if let Some(capacity) = endpoint.channel_capacity {
        config.transport.channel_capacity = capacity;
    }
    if let Some(size) = endpoint.max_frame_size {
        config.transport.max_frame_size = size;
    }

    if let Some(ms) = toml.conversation.provisional_ms {
        config.provisional_ms = ms;
    }
    if let Some(spacing) = toml.conversation.fragment_spacing {
        config.fragment_spacing = spacing;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ClientConfigFile, lookup: impl Fn(&str) -> Option<String>) {
    if config.transport.apply_env(&lookup) {
        config.source = ConfigSource::Env;
    }

    if let Some(ms) = lookup("STREAMER_PROVISIONAL_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.provisional_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = lookup("STREAMER_FRAGMENT_SPACING") {
        match value.parse::<FragmentSpacing>() {
            Ok(spacing) => {
                config.fragment_spacing = spacing;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring STREAMER_FRAGMENT_SPACING"),
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Host override
    pub host: Option<String>,

    /// Port override
    pub port: Option<u16>,

    /// Path override
    pub path: Option<String>,

    /// TLS override
    pub secure: Option<bool>,

    /// Connect timeout override (milliseconds)
    pub connect_timeout_ms: Option<u64>,

    /// Provisional period override (milliseconds)
    pub provisional_ms: Option<u64>,

    /// Fragment spacing override
    pub fragment_spacing: Option<FragmentSpacing>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set host override
    #[must_use]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    /// Set port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set path override
    #[must_use]
    pub fn with_path(mut self, path: String) -> Self {
        self.path = Some(path);
        self
    }

    /// Set TLS override
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    /// Set connect timeout override
    #[must_use]
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    /// Set provisional period override
    #[must_use]
    pub fn with_provisional_ms(mut self, ms: u64) -> Self {
        self.provisional_ms = Some(ms);
        self
    }

    /// Set fragment spacing override
    #[must_use]
    pub fn with_fragment_spacing(mut self, spacing: FragmentSpacing) -> Self {
        self.fragment_spacing = Some(spacing);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.port.is_none()
            && self.path.is_none()
            && self.secure.is_none()
            && self.connect_timeout_ms.is_none()
            && self.provisional_ms.is_none()
            && self.fragment_spacing.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfigFile) {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref host) = self.host {
            config.transport.host = host.clone();
        }
        if let Some(port) = self.port {
            config.transport.port = port;
        }
        if let Some(ref path) = self.path {
            config.transport.path = path.clone();
        }
        if let Some(secure) = self.secure {
            config.transport.secure = secure;
        }
        if let Some(timeout) = self.connect_timeout_ms {
            config.transport.connect_timeout_ms = timeout;
        }
        if let Some(ms) = self.provisional_ms {
            config.provisional_ms = ms;
        }
        if let Some(spacing) = self.fragment_spacing {
            config.fragment_spacing = spacing;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
