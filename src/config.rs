//! Global configuration parsing and validation.
//!
//! Every field has a default, so an empty TOML document (or no file at all)
//! yields a usable configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::transport::codec::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_MESSAGE_BYTES};
use crate::{AppError, Result};

/// Protocol version the server speaks.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Server identity advertised during `initialize`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Name reported in `serverInfo`.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Version reported in `serverInfo`.
    #[serde(default = "default_server_version")]
    pub version: String,
    /// Protocol version reported in the `initialize` result.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_name() -> String {
    env!("CARGO_PKG_NAME").into()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.into()
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
            protocol_version: default_protocol_version(),
            log_level: default_log_level(),
        }
    }
}

/// Session lifecycle timing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Inactivity after which the sweep evicts a session.
    #[serde(default = "default_session_timeout")]
    pub timeout_seconds: u64,
    /// Age after which a pending request is cancelled.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Period of the background sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// How long `shutdown` waits for pending requests to drain.
    #[serde(default = "default_drain_ms")]
    pub shutdown_drain_ms: u64,
    /// How long registry shutdown waits for sessions to be removed.
    #[serde(default = "default_stop_ms")]
    pub stop_timeout_ms: u64,
}

fn default_session_timeout() -> u64 {
    1800
}

fn default_request_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_drain_ms() -> u64 {
    5000
}

fn default_stop_ms() -> u64 {
    5000
}

impl SessionConfig {
    /// Session inactivity timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Pending-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Sweep period.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Bound on the `shutdown` drain wait.
    #[must_use]
    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }

    /// Bound on registry stop.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_session_timeout(),
            request_timeout_seconds: default_request_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            shutdown_drain_ms: default_drain_ms(),
            stop_timeout_ms: default_stop_ms(),
        }
    }
}

/// Wire framing limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TransportConfig {
    /// Largest accepted message body in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Largest accepted header block in bytes.
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

fn default_max_header_bytes() -> usize {
    DEFAULT_MAX_HEADER_BYTES
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: default_max_message_bytes(),
            max_header_bytes: default_max_header_bytes(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Server identity.
    #[serde(default)]
    pub server: ServerConfig,
    /// Session timing.
    #[serde(default)]
    pub session: SessionConfig,
    /// Framing limits.
    #[serde(default)]
    pub transport: TransportConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let non_zero = [
            ("session.timeout_seconds", self.session.timeout_seconds),
            (
                "session.request_timeout_seconds",
                self.session.request_timeout_seconds,
            ),
            (
                "session.sweep_interval_seconds",
                self.session.sweep_interval_seconds,
            ),
            ("session.stop_timeout_ms", self.session.stop_timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(AppError::Config(format!(
                    "{field} must be greater than zero"
                )));
            }
        }

        if self.transport.max_message_bytes == 0 || self.transport.max_header_bytes == 0 {
            return Err(AppError::Config(
                "transport limits must be greater than zero".into(),
            ));
        }

        if self.server.protocol_version.trim().is_empty() {
            return Err(AppError::Config(
                "server.protocol_version must not be empty".into(),
            ));
        }

        Ok(())
    }
}
