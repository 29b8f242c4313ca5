use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally visible lifecycle state of a connection.
///
/// A retry that is waiting on its timer reports as `Connecting`;
/// `Disconnected` is only observable from inside a *disconnect* callback
/// when persistence is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// `begin` has not been called yet.
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    /// `end` was called. `begin` may start again from here.
    Terminated,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Terminated => "terminated",
        }
    }

    /// Nothing is open, pending or scheduled.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle | Self::Terminated)
    }

    /// Port and baud rate may only change in these states.
    pub fn accepts_configuration(self) -> bool {
        matches!(self, Self::Idle | Self::Terminated | Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_serde_agree() {
        for state in [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Terminated,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn test_idle_states() {
        assert!(ConnectionState::Idle.is_idle());
        assert!(ConnectionState::Terminated.is_idle());
        assert!(!ConnectionState::Connecting.is_idle());
        assert!(!ConnectionState::Connected.is_idle());
    }
}
