//! Configuration schema definitions.
//!
//! Every section uses `#[serde(default)]`, so a file only needs the keys it
//! wants to change.

use super::error::{ConfigError, ConfigResult};
use crate::error::ConnectionError;
use crate::framing::LineFramer;
use crate::port::PortFilter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default baud rate for new connections.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Default delay between a disconnect and the next open attempt.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1500;
/// Default port list refresh period.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub lister: ListerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Check value ranges. An empty port is allowed here since it may be
    /// supplied later (CLI flag or `configure`).
    pub fn validate(&self) -> ConfigResult<()> {
        if self.connection.baud_rate == 0 {
            return Err(ConfigError::invalid(
                "connection.baud_rate",
                "must be a positive integer",
            ));
        }
        if self.connection.max_line_bytes == 0 {
            return Err(ConfigError::invalid(
                "connection.max_line_bytes",
                "must be at least 1",
            ));
        }
        if self.lister.enabled && self.lister.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "lister.poll_interval_ms",
                "must be at least 1 when the lister is enabled",
            ));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("unknown level '{}'", self.logging.level),
            ));
        }
        Ok(())
    }
}

/// Settings for one logical connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Port identifier, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    pub baud_rate: u32,
    /// Keep retrying after disconnects and errors until `end` is called.
    pub auto_reconnect: bool,
    pub reconnect_interval_ms: u64,
    /// Log outgoing data and listener failures.
    pub debug: bool,
    /// Packet delimiter; a preceding `\r` is always stripped.
    pub delimiter: String,
    pub max_line_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            auto_reconnect: true,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            debug: false,
            delimiter: "\n".to_string(),
            max_line_bytes: LineFramer::DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl ConnectionConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn set_reconnect_interval(&mut self, interval: Duration) {
        self.reconnect_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    }

    /// The guard `begin` applies before issuing an open.
    pub fn validate_target(&self) -> Result<(), ConnectionError> {
        if self.port.trim().is_empty() {
            return Err(ConnectionError::MissingPort);
        }
        if self.baud_rate == 0 {
            return Err(ConnectionError::InvalidBaudRate(self.baud_rate));
        }
        Ok(())
    }

    /// A framer configured with this connection's delimiter.
    pub fn framer(&self) -> LineFramer {
        LineFramer::with_delimiter(self.delimiter.as_bytes().to_vec(), self.max_line_bytes)
    }
}

/// Port lister section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListerConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub exclude_path_prefixes: Vec<String>,
    pub exclude_manufacturers: Vec<String>,
}

impl Default for ListerConfig {
    fn default() -> Self {
        let filter = PortFilter::default();
        Self {
            enabled: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            exclude_path_prefixes: filter.exclude_path_prefixes,
            exclude_manufacturers: filter.exclude_manufacturers,
        }
    }
}

impl ListerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn filter(&self) -> PortFilter {
        PortFilter {
            exclude_path_prefixes: self.exclude_path_prefixes.clone(),
            exclude_manufacturers: self.exclude_manufacturers.clone(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback level when `RUST_LOG` is unset: "trace" through "error".
    pub level: String,
    pub format: LogFormat,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}
