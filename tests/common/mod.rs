//! Shared helpers for the integration tests.
//!
//! Every test runs on a current-thread runtime with paused time, so the
//! helpers below move the clock explicitly and yield until spawned tasks
//! have caught up.

#![allow(dead_code)]

use parking_lot::Mutex;
use persistent_serial::port::{MockLinkHandle, MockTransport};
use persistent_serial::{BeginOptions, ConnectionManager, STARTUP_GLITCH_WINDOW};
use std::sync::Arc;
use std::time::Duration;

pub const PORT: &str = "MOCK0";
pub const BAUD: u32 = 9600;

/// Let every ready task run to its next await point.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Move the paused clock forward, then let woken tasks run.
pub async fn advance(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

pub fn mock_manager() -> (MockTransport, ConnectionManager) {
    let transport = MockTransport::new();
    let manager = ConnectionManager::new(Arc::new(transport.clone()));
    (transport, manager)
}

pub fn begin_options() -> BeginOptions {
    BeginOptions::new().port(PORT).baud_rate(BAUD)
}

/// A manager with an established link, past the startup glitch window.
pub async fn connected_manager() -> (MockTransport, ConnectionManager, MockLinkHandle) {
    let (transport, manager) = mock_manager();
    manager.begin(begin_options()).expect("begin");
    settle().await;
    let link = transport.last_link().expect("link established");
    past_glitch_window().await;
    (transport, manager, link)
}

pub async fn past_glitch_window() {
    advance(STARTUP_GLITCH_WINDOW.as_millis() as u64 + 50).await;
}

/// Records lifecycle, error and write events in the order they fire.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Register connect, reconnect, disconnect, error and write callbacks.
    /// The read callback is left alone so the manager stays in pull mode.
    pub fn attach(manager: &ConnectionManager) -> Self {
        let log = Self::default();

        let sink = log.clone();
        manager.on_connect(move || sink.push("connect"));
        let sink = log.clone();
        manager.on_reconnect(move || sink.push("reconnect"));
        let sink = log.clone();
        manager.on_disconnect(move || sink.push("disconnect"));
        let sink = log.clone();
        manager.on_error(move |_| sink.push("error"));
        let sink = log.clone();
        manager.on_write(move |bytes| sink.push(format!("write:{}", String::from_utf8_lossy(bytes))));

        log
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
