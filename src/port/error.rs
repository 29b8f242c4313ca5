//! Port-specific error types.
//!
//! Transport failures are kept apart from the manager's own rejections
//! (`crate::error::ConnectionError`): a `PortError` is never returned to the
//! caller of `begin`/`write`, it surfaces through the *error* event instead.

use thiserror::Error;

/// Errors that can occur while opening or driving a serial link.
#[derive(Debug, Error)]
pub enum PortError {
    /// The specified serial port was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port configuration failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Attempted to use a link that is not open.
    #[error("Port is not open")]
    NotOpen,

    /// The remote end went away while the link was in use.
    #[error("Link closed: {0}")]
    Closed(String),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap an arbitrary message as an I/O error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(std::io::Error::other(message.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PortError::not_found("/dev/ttyUSB0");
        assert_eq!(err.to_string(), "Serial port not found: /dev/ttyUSB0");

        let err = PortError::config("Invalid baud rate");
        assert_eq!(err.to_string(), "Configuration error: Invalid baud rate");

        let err = PortError::NotOpen;
        assert_eq!(err.to_string(), "Port is not open");
    }

    #[test]
    fn test_io_helper_keeps_message() {
        let err = PortError::io("device unplugged");
        assert!(matches!(err, PortError::Io(_)));
        assert!(err.to_string().contains("device unplugged"));
    }
}
