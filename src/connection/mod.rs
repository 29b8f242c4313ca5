//! The resilient connection: lifecycle state machine, reconnect timer and
//! the wiring from decoded packets to buffer, events and counters.

mod link;
mod manager;
mod state;

pub use manager::{ConnectionManager, WeakConnectionManager};
pub use state::ConnectionState;

use crate::dispatch::ReadCallback;
use crate::packet::Packet;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The first packet after an open is discarded if it arrives sooner than
/// this. Many USB adapters emit line noise right after the port opens.
pub const STARTUP_GLITCH_WINDOW: Duration = Duration::from_millis(100);

/// Port and baud rate an open is issued with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTarget {
    pub port: String,
    pub baud_rate: u32,
}

/// Arguments for [`ConnectionManager::begin`]. Anything left unset keeps the
/// manager's configured value.
#[derive(Default, Clone)]
pub struct BeginOptions {
    port: Option<String>,
    baud_rate: Option<u32>,
    on_read: Option<ReadCallback>,
}

impl BeginOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    /// Consume packets in push mode from the start.
    pub fn on_read<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        self.on_read = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for BeginOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeginOptions")
            .field("port", &self.port)
            .field("baud_rate", &self.baud_rate)
            .field("on_read", &self.on_read.is_some())
            .finish()
    }
}
