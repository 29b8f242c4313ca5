//! Event callbacks and their invocation boundary.
//!
//! Each event kind has at most one callback. Callbacks are cloned out of the
//! table before they run, so a callback may register other callbacks or call
//! back into the connection manager without deadlocking. A panicking callback
//! is contained here and never reaches the state machine.

use crate::packet::Packet;
use crate::port::PortError;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Callback for connect, reconnect and disconnect.
pub type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;
/// Callback for transport failures.
pub type ErrorCallback = Arc<dyn Fn(&PortError) + Send + Sync>;
/// Callback for each decoded packet.
pub type ReadCallback = Arc<dyn Fn(&Packet) + Send + Sync>;
/// Callback for outgoing bytes, invoked before they reach the link.
pub type WriteCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// The kinds of events a consumer can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Reconnect,
    Disconnect,
    Error,
    Read,
    Write,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Reconnect => "reconnect",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event ready to be delivered.
#[derive(Debug)]
pub enum ConnectionEvent {
    Connected,
    Reconnected,
    Disconnected,
    Error(PortError),
    Read(Packet),
    Write(Vec<u8>),
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connect,
            Self::Reconnected => EventKind::Reconnect,
            Self::Disconnected => EventKind::Disconnect,
            Self::Error(_) => EventKind::Error,
            Self::Read(_) => EventKind::Read,
            Self::Write(_) => EventKind::Write,
        }
    }
}

#[derive(Default)]
struct Handlers {
    connect: Option<LifecycleCallback>,
    reconnect: Option<LifecycleCallback>,
    disconnect: Option<LifecycleCallback>,
    error: Option<ErrorCallback>,
    read: Option<ReadCallback>,
    write: Option<WriteCallback>,
}

/// Store `callback` in `slot`. `None` is rejected and leaves the slot alone.
fn install<T>(slot: &mut Option<T>, callback: Option<T>) -> bool {
    match callback {
        Some(callback) => {
            *slot = Some(callback);
            true
        }
        None => false,
    }
}

/// Holds one optional callback per [`EventKind`].
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<Handlers>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connect(&self, callback: Option<LifecycleCallback>) -> bool {
        install(&mut self.handlers.write().connect, callback)
    }

    pub fn set_reconnect(&self, callback: Option<LifecycleCallback>) -> bool {
        install(&mut self.handlers.write().reconnect, callback)
    }

    pub fn set_disconnect(&self, callback: Option<LifecycleCallback>) -> bool {
        install(&mut self.handlers.write().disconnect, callback)
    }

    pub fn set_error(&self, callback: Option<ErrorCallback>) -> bool {
        install(&mut self.handlers.write().error, callback)
    }

    pub fn set_read(&self, callback: Option<ReadCallback>) -> bool {
        install(&mut self.handlers.write().read, callback)
    }

    pub fn set_write(&self, callback: Option<WriteCallback>) -> bool {
        install(&mut self.handlers.write().write, callback)
    }

    /// Whether a callback is registered for `kind`.
    pub fn has(&self, kind: EventKind) -> bool {
        let handlers = self.handlers.read();
        match kind {
            EventKind::Connect => handlers.connect.is_some(),
            EventKind::Reconnect => handlers.reconnect.is_some(),
            EventKind::Disconnect => handlers.disconnect.is_some(),
            EventKind::Error => handlers.error.is_some(),
            EventKind::Read => handlers.read.is_some(),
            EventKind::Write => handlers.write.is_some(),
        }
    }

    /// Deliver `event` to its callback, if any. Listener panics are logged
    /// when `debug` is set and otherwise swallowed.
    pub fn emit(&self, event: &ConnectionEvent, debug: bool) {
        let kind = event.kind();
        match event {
            ConnectionEvent::Connected => self.fire(kind, debug, |h| h.connect.clone(), |cb| cb()),
            ConnectionEvent::Reconnected => {
                self.fire(kind, debug, |h| h.reconnect.clone(), |cb| cb())
            }
            ConnectionEvent::Disconnected => {
                self.fire(kind, debug, |h| h.disconnect.clone(), |cb| cb())
            }
            ConnectionEvent::Error(err) => self.fire(kind, debug, |h| h.error.clone(), |cb| cb(err)),
            ConnectionEvent::Read(packet) => {
                self.fire(kind, debug, |h| h.read.clone(), |cb| cb(packet))
            }
            ConnectionEvent::Write(bytes) => {
                self.fire(kind, debug, |h| h.write.clone(), |cb| cb(bytes.as_slice()))
            }
        }
    }

    fn fire<C>(
        &self,
        kind: EventKind,
        debug: bool,
        select: impl FnOnce(&Handlers) -> Option<C>,
        call: impl FnOnce(&C),
    ) {
        // The read guard is released before the callback runs.
        let callback = select(&*self.handlers.read());
        if let Some(callback) = callback {
            invoke_guarded(kind.as_str(), debug, || call(&callback));
        }
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<&str> = [
            EventKind::Connect,
            EventKind::Reconnect,
            EventKind::Disconnect,
            EventKind::Error,
            EventKind::Read,
            EventKind::Write,
        ]
        .into_iter()
        .filter(|kind| self.has(*kind))
        .map(EventKind::as_str)
        .collect();
        f.debug_struct("EventDispatcher")
            .field("registered", &registered)
            .finish()
    }
}

/// Run a consumer callback, containing any panic. Returns false if it panicked.
pub(crate) fn invoke_guarded(event: &str, debug: bool, callback: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            if debug {
                warn!(event, reason = %panic_reason(payload.as_ref()), "listener failed");
            }
            false
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let log = Arc::clone(&log);
            move |entry: &str| log.lock().push(entry.to_string())
        };
        (log, sink)
    }

    #[test]
    fn test_emit_without_callback_is_noop() {
        let dispatcher = EventDispatcher::new();
        dispatcher.emit(&ConnectionEvent::Connected, true);
        assert!(!dispatcher.has(EventKind::Connect));
    }

    #[test]
    fn test_register_replaces_previous() {
        let dispatcher = EventDispatcher::new();
        let (log, sink) = recorder();

        let first = sink.clone();
        assert!(dispatcher.set_connect(Some(Arc::new(move || first("first")))));
        let second = sink.clone();
        assert!(dispatcher.set_connect(Some(Arc::new(move || second("second")))));

        dispatcher.emit(&ConnectionEvent::Connected, false);
        assert_eq!(*log.lock(), vec!["second".to_string()]);
    }

    #[test]
    fn test_none_is_rejected_and_keeps_existing() {
        let dispatcher = EventDispatcher::new();
        let (log, sink) = recorder();

        assert!(dispatcher.set_disconnect(Some(Arc::new(move || sink("kept")))));
        assert!(!dispatcher.set_disconnect(None));

        dispatcher.emit(&ConnectionEvent::Disconnected, false);
        assert_eq!(*log.lock(), vec!["kept".to_string()]);
    }

    #[test]
    fn test_payloads_reach_callbacks() {
        let dispatcher = EventDispatcher::new();
        let (log, sink) = recorder();

        let on_read = sink.clone();
        dispatcher.set_read(Some(Arc::new(move |p: &Packet| on_read(p.as_str()))));
        let on_write = sink.clone();
        dispatcher.set_write(Some(Arc::new(move |b: &[u8]| {
            on_write(&String::from_utf8_lossy(b))
        })));
        let on_error = sink;
        dispatcher.set_error(Some(Arc::new(move |e: &PortError| {
            on_error(&e.to_string())
        })));

        dispatcher.emit(&ConnectionEvent::Read(Packet::new("in")), false);
        dispatcher.emit(&ConnectionEvent::Write(b"out".to_vec()), false);
        dispatcher.emit(&ConnectionEvent::Error(PortError::NotOpen), false);

        assert_eq!(
            *log.lock(),
            vec![
                "in".to_string(),
                "out".to_string(),
                "Port is not open".to_string()
            ]
        );
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let dispatcher = EventDispatcher::new();
        dispatcher.set_reconnect(Some(Arc::new(|| panic!("consumer bug"))));

        dispatcher.emit(&ConnectionEvent::Reconnected, true);
        dispatcher.emit(&ConnectionEvent::Reconnected, false);

        assert!(dispatcher.has(EventKind::Reconnect));
    }

    #[test]
    fn test_callback_may_reregister() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (log, sink) = recorder();

        let inner = Arc::clone(&dispatcher);
        dispatcher.set_connect(Some(Arc::new(move || {
            let sink = sink.clone();
            inner.set_connect(Some(Arc::new(move || sink("replaced"))));
        })));

        dispatcher.emit(&ConnectionEvent::Connected, false);
        dispatcher.emit(&ConnectionEvent::Connected, false);
        assert_eq!(*log.lock(), vec!["replaced".to_string()]);
    }

    #[test]
    fn test_invoke_guarded_reports_panic() {
        assert!(invoke_guarded("read", false, || {}));
        assert!(!invoke_guarded("read", false, || panic!("boom")));
    }
}
