//! The connection state machine.
//!
//! All mutable state sits behind one mutex. Every signal (open result,
//! packets, link loss, retry timer) takes the lock, runs its transition to
//! completion and releases it before any callback fires, so callbacks are
//! free to call back into the manager.

use super::link::{self, LinkCommand, LinkOutcome};
use super::{BeginOptions, ConnectionState, ConnectionTarget, STARTUP_GLITCH_WINDOW};
use crate::config::ConnectionConfig;
use crate::dispatch::{ConnectionEvent, EventDispatcher, EventKind, ReadCallback};
use crate::error::{ConnectionError, ConnectionResult};
use crate::packet::{Packet, PacketBuffer};
use crate::port::{PortError, PortInfo, PortListHandle, TokioSerialTransport, Transport};
use crate::stats::{Stats, StatsCollector};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

enum Phase {
    Idle,
    /// An open task is in flight.
    Opening,
    /// Waiting on the retry timer.
    RetryPending,
    Connected {
        outbound: mpsc::UnboundedSender<LinkCommand>,
    },
    Terminated,
}

impl Phase {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Idle,
            Self::Opening | Self::RetryPending => ConnectionState::Connecting,
            Self::Connected { .. } => ConnectionState::Connected,
            Self::Terminated => ConnectionState::Terminated,
        }
    }

    /// An open is pending or a link is established.
    fn open_in_flight(&self) -> bool {
        matches!(self, Self::Opening | Self::Connected { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    /// Packets are buffered for `read`/`peek`.
    Pull,
    /// Packets go to the read callback only.
    Push,
}

struct Core {
    config: ConnectionConfig,
    phase: Phase,
    /// Bumped on every open and on `end`; signals from older values are stale.
    generation: u64,
    /// Set by `begin`, cleared by `end`.
    armed: bool,
    /// No open has succeeded since the last `begin`.
    first_connect: bool,
    stats: StatsCollector,
    buffer: PacketBuffer,
    mode: ReadMode,
    last_packet: Option<Packet>,
    /// The next packet is checked against the startup glitch window.
    glitch_guard: bool,
    retry_timer: Option<AbortHandle>,
}

impl Core {
    fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            generation: 0,
            armed: false,
            first_connect: true,
            stats: StatsCollector::new(),
            buffer: PacketBuffer::new(),
            mode: ReadMode::Pull,
            last_packet: None,
            glitch_guard: false,
            retry_timer: None,
        }
    }

    fn target(&self) -> ConnectionTarget {
        ConnectionTarget {
            port: self.config.port.clone(),
            baud_rate: self.config.baud_rate,
        }
    }

    fn persistent(&self) -> bool {
        self.armed && self.config.auto_reconnect
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    fn enter_pull_mode(&mut self) {
        self.mode = ReadMode::Pull;
    }
}

pub(super) struct Shared {
    core: Mutex<Core>,
    events: EventDispatcher,
    transport: Arc<dyn Transport>,
    ports: RwLock<Option<PortListHandle>>,
}

impl Shared {
    fn emit(&self, event: ConnectionEvent, debug: bool) {
        self.events.emit(&event, debug);
    }

    /// Issue an open under a fresh generation. Every open goes through
    /// here; nothing is issued while another is pending or established.
    fn start_open(self: &Arc<Self>, core: &mut Core) -> bool {
        if core.phase.open_in_flight() {
            return false;
        }
        core.generation += 1;
        core.phase = Phase::Opening;
        link::spawn(
            Arc::downgrade(self),
            Arc::clone(&self.transport),
            core.generation,
            core.target(),
            core.config.framer(),
        );
        true
    }

    /// The link is gone or never came up: retry later or fall back to idle.
    fn settle_after_loss(self: &Arc<Self>, core: &mut Core) {
        core.cancel_retry();
        if !core.persistent() {
            core.armed = false;
            core.phase = Phase::Idle;
            return;
        }

        let interval = core.config.reconnect_interval();
        let generation = core.generation;
        let shared = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(manager) = shared.upgrade() {
                manager.retry_due(generation);
            }
        });
        debug!(?interval, generation, "reconnect scheduled");
        core.retry_timer = Some(timer.abort_handle());
        core.phase = Phase::RetryPending;
    }

    pub(super) fn open_succeeded(
        self: &Arc<Self>,
        generation: u64,
        outbound: mpsc::UnboundedSender<LinkCommand>,
    ) -> bool {
        let (event, debug) = {
            let mut core = self.core.lock();
            if core.generation != generation || !matches!(core.phase, Phase::Opening) {
                return false;
            }
            let fresh = core.first_connect;
            core.first_connect = false;
            core.stats.record_open(fresh, Instant::now());
            core.glitch_guard = true;
            core.phase = Phase::Connected { outbound };
            debug!(port = %core.config.port, fresh, generation, "link established");

            let event = if fresh {
                ConnectionEvent::Connected
            } else {
                ConnectionEvent::Reconnected
            };
            (event, core.config.debug)
        };
        self.emit(event, debug);
        true
    }

    pub(super) fn open_failed(self: &Arc<Self>, generation: u64, err: PortError) {
        let debug = {
            let mut core = self.core.lock();
            if core.generation != generation || !matches!(core.phase, Phase::Opening) {
                debug!(generation, error = %err, "ignoring superseded open failure");
                return;
            }
            debug!(port = %core.config.port, error = %err, "open failed");
            core.stats.record_error();
            self.settle_after_loss(&mut core);
            core.config.debug
        };
        self.emit(ConnectionEvent::Error(err), debug);
    }

    pub(super) fn packets_arrived(&self, generation: u64, packets: Vec<Packet>) {
        let (accepted, debug) = {
            let mut core = self.core.lock();
            if core.generation != generation || !matches!(core.phase, Phase::Connected { .. }) {
                return;
            }
            let now = Instant::now();
            let mut accepted = Vec::with_capacity(packets.len());
            for packet in packets {
                if std::mem::take(&mut core.glitch_guard) {
                    let early = core
                        .stats
                        .connected_at()
                        .is_some_and(|at| now.saturating_duration_since(at) < STARTUP_GLITCH_WINDOW);
                    if early {
                        debug!(len = packet.len(), "dropping startup glitch");
                        continue;
                    }
                }
                core.stats.record_received();
                core.last_packet = Some(packet.clone());
                if core.mode == ReadMode::Pull {
                    core.buffer.push(packet.clone());
                }
                accepted.push(packet);
            }
            (accepted, core.config.debug)
        };

        if !self.events.has(EventKind::Read) {
            return;
        }
        for packet in accepted {
            self.emit(ConnectionEvent::Read(packet), debug);
        }
    }

    pub(super) fn link_ended(self: &Arc<Self>, generation: u64, outcome: LinkOutcome) {
        let error = match outcome {
            LinkOutcome::Shutdown => return,
            LinkOutcome::Closed => None,
            LinkOutcome::Failed(err) => Some(err),
        };

        let debug = {
            let mut core = self.core.lock();
            if core.generation != generation || !matches!(core.phase, Phase::Connected { .. }) {
                return;
            }
            debug!(port = %core.config.port, error = ?error, "link lost");
            core.stats.record_close();
            if error.is_some() {
                core.stats.record_error();
            }
            core.glitch_guard = false;
            self.settle_after_loss(&mut core);
            core.config.debug
        };

        if let Some(err) = error {
            self.emit(ConnectionEvent::Error(err), debug);
        }
        self.emit(ConnectionEvent::Disconnected, debug);
    }

    fn retry_due(self: &Arc<Self>, generation: u64) {
        let mut core = self.core.lock();
        if core.generation != generation || !matches!(core.phase, Phase::RetryPending) {
            return;
        }
        core.retry_timer = None;
        if !core.persistent() {
            core.armed = false;
            core.phase = Phase::Idle;
            return;
        }

        core.stats.record_reconnect_attempt();
        debug!(
            port = %core.config.port,
            attempt = core.stats.reconnect_count(),
            "reconnecting"
        );
        self.start_open(&mut core);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.core.get_mut().cancel_retry();
    }
}

/// Handle to one resilient serial connection.
///
/// Cloning is cheap and every clone controls the same connection. Background
/// tasks only hold weak references, so dropping the last handle closes the
/// link and cancels any pending retry. Methods that start work (`begin`, and
/// the retry path it enables) must run inside a Tokio runtime.
///
/// ```no_run
/// use persistent_serial::{BeginOptions, ConnectionManager};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = ConnectionManager::serial();
/// manager.on_connect(|| println!("connected"));
/// manager.begin(BeginOptions::new().port("/dev/ttyUSB0").baud_rate(115_200))?;
///
/// while let Some(packet) = manager.read() {
///     println!("{packet}");
/// }
/// manager.end();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

/// Non-owning handle, see [`ConnectionManager::downgrade`].
#[derive(Clone)]
pub struct WeakConnectionManager {
    shared: Weak<Shared>,
}

impl WeakConnectionManager {
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.shared.upgrade().map(|shared| ConnectionManager { shared })
    }
}

impl fmt::Debug for WeakConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConnectionManager")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ConnectionConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core::new(config)),
                events: EventDispatcher::new(),
                transport,
                ports: RwLock::new(None),
            }),
        }
    }

    /// A manager backed by the host's serial ports.
    pub fn serial() -> Self {
        Self::new(Arc::new(TokioSerialTransport))
    }

    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            shared: Arc::downgrade(&self.shared),
        }
    }

    // ---- lifecycle ----

    /// Start connecting. Port and baud rate given here replace the configured
    /// ones; an `on_read` callback switches to push mode before the first
    /// open. Returns immediately; progress is reported through events.
    pub fn begin(&self, options: BeginOptions) -> ConnectionResult<()> {
        let BeginOptions {
            port,
            baud_rate,
            on_read,
        } = options;

        let mut core = self.shared.core.lock();
        let state = core.phase.state();
        if !state.is_idle() {
            debug!(%state, "begin ignored, connection busy");
            return Err(ConnectionError::Busy(state));
        }

        let mut config = core.config.clone();
        if let Some(port) = port {
            config.port = port;
        }
        if let Some(baud_rate) = baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Err(err) = config.validate_target() {
            warn!(error = %err, "begin rejected");
            return Err(err);
        }

        core.config = config;
        core.cancel_retry();
        core.armed = true;
        core.first_connect = true;
        core.glitch_guard = false;
        debug!(port = %core.config.port, baud_rate = core.config.baud_rate, "begin");

        if let Some(callback) = on_read {
            install_push_reader(&mut core, &self.shared.events, callback);
        }
        self.shared.start_open(&mut core);
        Ok(())
    }

    /// Stop for good: cancel any retry, close the link and drop buffered
    /// packets. Late results of an in-flight open are ignored.
    pub fn end(&self) {
        let (was_connected, debug) = {
            let mut core = self.shared.core.lock();
            core.armed = false;
            core.cancel_retry();
            core.generation += 1;
            let was_connected = match std::mem::replace(&mut core.phase, Phase::Terminated) {
                Phase::Connected { outbound } => {
                    let _ = outbound.send(LinkCommand::Close);
                    true
                }
                _ => false,
            };
            core.buffer.clear();
            core.glitch_guard = false;
            if was_connected {
                core.stats.record_close();
            }
            debug!(port = %core.config.port, was_connected, "end");
            (was_connected, core.config.debug)
        };

        if was_connected {
            self.shared.emit(ConnectionEvent::Disconnected, debug);
        }
    }

    // ---- configuration ----

    /// Change port and/or baud rate. Refused while connecting or connected.
    pub fn configure(
        &self,
        port: Option<&str>,
        baud_rate: Option<u32>,
    ) -> ConnectionResult<ConnectionTarget> {
        let mut core = self.shared.core.lock();
        let state = core.phase.state();
        if !state.accepts_configuration() {
            warn!(%state, "configuration change refused");
            return Err(ConnectionError::Busy(state));
        }
        if let Some(port) = port {
            if port.trim().is_empty() {
                return Err(ConnectionError::MissingPort);
            }
        }
        if baud_rate == Some(0) {
            return Err(ConnectionError::InvalidBaudRate(0));
        }

        if let Some(port) = port {
            core.config.port = port.to_string();
        }
        if let Some(baud_rate) = baud_rate {
            core.config.baud_rate = baud_rate;
        }
        Ok(core.target())
    }

    pub fn set_port(&self, port: &str) -> ConnectionResult<()> {
        self.configure(Some(port), None).map(drop)
    }

    pub fn set_baud_rate(&self, baud_rate: u32) -> ConnectionResult<()> {
        self.configure(None, Some(baud_rate)).map(drop)
    }

    pub fn port(&self) -> String {
        self.shared.core.lock().config.port.clone()
    }

    pub fn baud_rate(&self) -> u32 {
        self.shared.core.lock().config.baud_rate
    }

    pub fn target(&self) -> ConnectionTarget {
        self.shared.core.lock().target()
    }

    /// A copy of the current settings.
    pub fn config(&self) -> ConnectionConfig {
        self.shared.core.lock().config.clone()
    }

    /// Read, and optionally set, the debug flag.
    pub fn debug(&self, enabled: Option<bool>) -> bool {
        let mut core = self.shared.core.lock();
        if let Some(enabled) = enabled {
            core.config.debug = enabled;
        }
        core.config.debug
    }

    /// Read, and optionally set, the delay before a reconnect attempt.
    /// A new value applies from the next scheduled retry.
    pub fn reconnect_interval(&self, interval: Option<Duration>) -> Duration {
        let mut core = self.shared.core.lock();
        if let Some(interval) = interval {
            core.config.set_reconnect_interval(interval);
        }
        core.config.reconnect_interval()
    }

    /// Read, and optionally set, reconnect persistence. Turning it off while
    /// a retry is pending cancels the retry.
    pub fn auto_reconnect(&self, enabled: Option<bool>) -> bool {
        let mut core = self.shared.core.lock();
        if let Some(enabled) = enabled {
            core.config.auto_reconnect = enabled;
            if !enabled && matches!(core.phase, Phase::RetryPending) {
                core.cancel_retry();
                core.armed = false;
                core.phase = Phase::Idle;
            }
        }
        core.config.auto_reconnect
    }

    // ---- events ----

    pub fn on_connect<F>(&self, callback: F) -> bool
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.events.set_connect(Some(Arc::new(callback)))
    }

    pub fn on_reconnect<F>(&self, callback: F) -> bool
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.events.set_reconnect(Some(Arc::new(callback)))
    }

    pub fn on_disconnect<F>(&self, callback: F) -> bool
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.events.set_disconnect(Some(Arc::new(callback)))
    }

    pub fn on_error<F>(&self, callback: F) -> bool
    where
        F: Fn(&PortError) + Send + Sync + 'static,
    {
        self.shared.events.set_error(Some(Arc::new(callback)))
    }

    /// Deliver packets to `callback` as they arrive. Switches to push mode,
    /// which discards any buffered backlog and stops buffering until a pull
    /// accessor is used again.
    pub fn on_read<F>(&self, callback: F) -> bool
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        let mut core = self.shared.core.lock();
        install_push_reader(&mut core, &self.shared.events, Arc::new(callback))
    }

    /// Called with outgoing bytes before they are queued for the link.
    pub fn on_write<F>(&self, callback: F) -> bool
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.shared.events.set_write(Some(Arc::new(callback)))
    }

    // ---- pull consumption ----

    /// Whether a buffered packet is waiting. Switches to pull mode.
    pub fn available(&self) -> bool {
        let mut core = self.shared.core.lock();
        core.enter_pull_mode();
        !core.buffer.is_empty()
    }

    /// Take the oldest buffered packet. Switches to pull mode.
    pub fn read(&self) -> Option<Packet> {
        let mut core = self.shared.core.lock();
        core.enter_pull_mode();
        core.buffer.pop()
    }

    /// Look at a buffered packet without removing it; 0 is the oldest.
    /// Switches to pull mode.
    pub fn peek(&self, index: usize) -> Option<Packet> {
        let mut core = self.shared.core.lock();
        core.enter_pull_mode();
        core.buffer.peek(index).cloned()
    }

    /// Number of buffered packets. Switches to pull mode.
    pub fn buffered(&self) -> usize {
        let mut core = self.shared.core.lock();
        core.enter_pull_mode();
        core.buffer.len()
    }

    /// The most recently accepted packet, in either mode.
    pub fn last(&self) -> Option<Packet> {
        self.shared.core.lock().last_packet.clone()
    }

    // ---- writing ----

    /// Queue `data` for the link. Returns false unless connected.
    pub fn write(&self, data: impl AsRef<[u8]>) -> bool {
        let data = data.as_ref();
        let (outbound, debug) = {
            let core = self.shared.core.lock();
            match &core.phase {
                Phase::Connected { outbound } => (outbound.clone(), core.config.debug),
                _ => return false,
            }
        };
        if debug {
            debug!(bytes = data.len(), "write");
        }

        self.shared.emit(ConnectionEvent::Write(data.to_vec()), debug);
        if outbound.send(LinkCommand::Write(data.to_vec())).is_err() {
            return false;
        }
        self.shared.core.lock().stats.record_sent();
        true
    }

    pub fn print(&self, text: &str) -> bool {
        self.write(text.as_bytes())
    }

    /// Write `text` followed by `\r\n`.
    pub fn println(&self, text: &str) -> bool {
        self.write(format!("{text}\r\n"))
    }

    // ---- status ----

    pub fn state(&self) -> ConnectionState {
        self.shared.core.lock().phase.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_idle(&self) -> bool {
        self.state().is_idle()
    }

    /// True while a lost connection is being restored: a retry is scheduled
    /// or a re-open is in flight.
    pub fn is_reconnecting(&self) -> bool {
        let core = self.shared.core.lock();
        match core.phase {
            Phase::RetryPending => true,
            Phase::Opening => !core.first_connect,
            _ => false,
        }
    }

    pub fn info(&self) -> Stats {
        let core = self.shared.core.lock();
        core.stats.snapshot(
            &core.config.port,
            core.config.baud_rate,
            core.phase.state(),
            Instant::now(),
        )
    }

    // ---- ports ----

    /// Serve [`list`](Self::list) from a running [`crate::port::PortLister`].
    pub fn attach_ports(&self, handle: PortListHandle) {
        *self.shared.ports.write() = Some(handle);
    }

    /// Latest port snapshot; empty when no lister is attached.
    pub fn list(&self) -> Vec<PortInfo> {
        self.shared
            .ports
            .read()
            .as_ref()
            .map(PortListHandle::ports)
            .unwrap_or_default()
    }
}

fn install_push_reader(core: &mut Core, events: &EventDispatcher, callback: ReadCallback) -> bool {
    core.mode = ReadMode::Push;
    core.buffer.clear();
    events.set_read(Some(callback))
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("ConnectionManager")
            .field("port", &core.config.port)
            .field("baud_rate", &core.config.baud_rate)
            .field("state", &core.phase.state())
            .field("generation", &core.generation)
            .field("mode", &core.mode)
            .field("buffered", &core.buffer.len())
            .field("events", &self.shared.events)
            .finish()
    }
}
