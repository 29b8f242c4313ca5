//! persistent-serial
//!
//! Keeps one logical serial connection alive over an unreliable physical
//! link. The device is reopened after unplugs and errors, the byte stream is
//! framed into line packets, and consumers either pull packets from a bounded
//! buffer or receive them through callbacks.
//!
//! # Modules
//!
//! - `connection`: the [`ConnectionManager`] state machine
//! - `port`: transport contracts, the tokio-serial transport, the mock
//!   transport and the periodic port lister
//! - `framing`: line framing of the incoming byte stream
//! - `packet`: packets, tiered decoding and the bounded pull buffer
//! - `dispatch`: per-event callbacks with panic isolation
//! - `stats`: connection counters and snapshots
//! - `config`: TOML configuration with environment overrides
//! - `logging`: tracing subscriber setup

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod logging;
pub mod packet;
pub mod port;
pub mod stats;

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult, ConnectionConfig};
pub use connection::{
    BeginOptions, ConnectionManager, ConnectionState, ConnectionTarget, WeakConnectionManager,
    STARTUP_GLITCH_WINDOW,
};
pub use dispatch::{ConnectionEvent, EventDispatcher, EventKind};
pub use error::{ConnectionError, ConnectionResult};
pub use framing::LineFramer;
pub use packet::{Packet, PacketBuffer, PacketValue, PACKET_BUFFER_CAPACITY};
pub use port::{
    Link, MockTransport, PortError, PortInfo, PortLister, TokioSerialTransport, Transport,
};
pub use stats::{Stats, StatsCollector};
