//! Errors returned directly to callers of the connection manager.
//!
//! These are rejections, not failures: the manager's state is left untouched
//! whenever one is returned. Transport failures travel through the *error*
//! event as [`crate::port::PortError`] instead.

use crate::connection::ConnectionState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// `begin` (or `configure`) was given no usable port identifier.
    #[error("No serial port selected. Set a port before calling begin.")]
    MissingPort,

    /// The baud rate must be a positive integer.
    #[error("Invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    /// The connection is pending or established; end it first.
    #[error("Connection is {0}; call end() before reconnecting or reconfiguring")]
    Busy(ConnectionState),
}

impl ConnectionError {
    /// True for the configuration class of errors (missing/invalid settings).
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingPort | Self::InvalidBaudRate(_))
    }
}

/// Convenient Result type for manager operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;
