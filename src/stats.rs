//! Connection health counters.

use crate::connection::ConnectionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Point-in-time view of a connection, computed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub port: String,
    pub baud_rate: u32,
    pub state: ConnectionState,
    pub idle: bool,
    pub connecting: bool,
    pub connected: bool,
    /// Set by the most recent failure, cleared by the next successful open.
    pub error: bool,
    pub error_count: u64,
    pub reconnect_count: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub millis_online: u64,
    pub connected_since: Option<DateTime<Utc>>,
}

/// Running counters owned by the connection manager.
#[derive(Debug, Default)]
pub struct StatsCollector {
    error: bool,
    error_count: u64,
    reconnect_count: u64,
    packets_received: u64,
    packets_sent: u64,
    connected_at: Option<Instant>,
    connected_since: Option<DateTime<Utc>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link came up. Packet counters restart only on a fresh connect.
    pub fn record_open(&mut self, fresh: bool, now: Instant) {
        if fresh {
            self.packets_received = 0;
            self.packets_sent = 0;
        }
        self.error = false;
        self.connected_at = Some(now);
        self.connected_since = Some(Utc::now());
    }

    /// The link went down or was closed on purpose.
    pub fn record_close(&mut self) {
        self.connected_at = None;
        self.connected_since = None;
    }

    pub fn record_error(&mut self) {
        self.error = true;
        self.error_count += 1;
    }

    pub fn clear_error(&mut self) {
        self.error = false;
    }

    pub fn record_reconnect_attempt(&mut self) {
        self.reconnect_count += 1;
    }

    pub fn record_received(&mut self) {
        self.packets_received += 1;
    }

    pub fn record_sent(&mut self) {
        self.packets_sent += 1;
    }

    pub fn connected_at(&self) -> Option<Instant> {
        self.connected_at
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count
    }

    pub fn millis_online(&self, now: Instant) -> u64 {
        self.connected_at
            .map(|at| now.saturating_duration_since(at).as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn snapshot(&self, port: &str, baud_rate: u32, state: ConnectionState, now: Instant) -> Stats {
        let connected = state == ConnectionState::Connected;
        Stats {
            port: port.to_string(),
            baud_rate,
            state,
            idle: state.is_idle(),
            connecting: state == ConnectionState::Connecting,
            connected,
            error: self.error,
            error_count: self.error_count,
            reconnect_count: self.reconnect_count,
            packets_received: self.packets_received,
            packets_sent: self.packets_sent,
            millis_online: if connected { self.millis_online(now) } else { 0 },
            connected_since: if connected { self.connected_since } else { None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_fresh_open_resets_packet_counters() {
        let mut stats = StatsCollector::new();
        let now = Instant::now();
        stats.record_open(true, now);
        stats.record_received();
        stats.record_sent();
        stats.record_close();

        stats.record_open(false, now);
        let snapshot = stats.snapshot("COM3", 9600, ConnectionState::Connected, now);
        assert_eq!(snapshot.packets_received, 1);
        assert_eq!(snapshot.packets_sent, 1);

        stats.record_open(true, now);
        let snapshot = stats.snapshot("COM3", 9600, ConnectionState::Connected, now);
        assert_eq!(snapshot.packets_received, 0);
        assert_eq!(snapshot.packets_sent, 0);
    }

    #[test]
    fn test_error_flag_cleared_by_open_but_count_kept() {
        let mut stats = StatsCollector::new();
        stats.record_error();
        stats.record_error();
        stats.record_open(false, Instant::now());

        let snapshot = stats.snapshot("COM3", 9600, ConnectionState::Connected, Instant::now());
        assert!(!snapshot.error);
        assert_eq!(snapshot.error_count, 2);
    }

    #[test]
    fn test_millis_online_only_while_connected() {
        let mut stats = StatsCollector::new();
        let opened = Instant::now();
        stats.record_open(true, opened);
        let later = opened + Duration::from_millis(1500);

        let snapshot = stats.snapshot("COM3", 9600, ConnectionState::Connected, later);
        assert_eq!(snapshot.millis_online, 1500);
        assert!(snapshot.connected_since.is_some());

        let snapshot = stats.snapshot("COM3", 9600, ConnectionState::Connecting, later);
        assert_eq!(snapshot.millis_online, 0);
        assert!(snapshot.connecting);
        assert!(!snapshot.idle);
    }

    #[test]
    fn test_idle_flag_covers_terminated() {
        let stats = StatsCollector::new();
        let snapshot = stats.snapshot("", 115200, ConnectionState::Terminated, Instant::now());
        assert!(snapshot.idle);
        assert!(!snapshot.connected);
        assert_eq!(snapshot.millis_online, 0);
    }
}
