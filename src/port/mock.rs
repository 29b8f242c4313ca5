//! Mock transport for testing.
//!
//! `MockTransport` simulates the physical layer without hardware. Open
//! attempts follow a script ([`OpenBehavior`]), every established link gets a
//! [`MockLinkHandle`] through which a test can feed bytes, inject failures,
//! hang up and inspect what the manager wrote.

use super::error::PortError;
use super::traits::{Link, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// What the next call to [`Transport::open`] should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Open immediately.
    Succeed,
    /// Fail immediately with an I/O error carrying this message.
    Fail(String),
    /// Stay pending until [`MockTransport::release_held_open`] is called,
    /// then succeed.
    Hold,
}

/// One recorded call to `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAttempt {
    pub port: String,
    pub baud_rate: u32,
}

#[derive(Debug, Default)]
struct MockTransportState {
    /// Behaviors consumed front to back; an empty script means `Succeed`.
    script: VecDeque<OpenBehavior>,
    /// Every open call, in order.
    attempts: Vec<OpenAttempt>,
    /// Handles of every link handed out, in order.
    links: Vec<MockLinkHandle>,
    /// Release switches for opens scripted with `Hold`.
    held: VecDeque<oneshot::Sender<()>>,
}

/// Scripted in-memory transport.
///
/// # Example
/// ```
/// use persistent_serial::port::{MockTransport, OpenBehavior};
///
/// let transport = MockTransport::new();
/// transport.script(OpenBehavior::Fail("busy".into()));
/// assert_eq!(transport.attempt_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a behavior for a future open attempt.
    pub fn script(&self, behavior: OpenBehavior) {
        self.state.lock().script.push_back(behavior);
    }

    /// All open attempts seen so far.
    pub fn attempts(&self) -> Vec<OpenAttempt> {
        self.state.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().attempts.len()
    }

    /// Handle of the `index`-th link handed out (0 = first successful open).
    pub fn link(&self, index: usize) -> Option<MockLinkHandle> {
        self.state.lock().links.get(index).cloned()
    }

    /// Handle of the most recent link.
    pub fn last_link(&self) -> Option<MockLinkHandle> {
        self.state.lock().links.last().cloned()
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    /// Let the oldest `Hold` open complete. Returns false if none is pending.
    pub fn release_held_open(&self) -> bool {
        let sender = self.state.lock().held.pop_front();
        match sender {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Link>, PortError> {
        let (behavior, release) = {
            let mut state = self.state.lock();
            state.attempts.push(OpenAttempt {
                port: port.to_string(),
                baud_rate,
            });
            let behavior = state.script.pop_front().unwrap_or(OpenBehavior::Succeed);
            let release = if behavior == OpenBehavior::Hold {
                let (tx, rx) = oneshot::channel();
                state.held.push_back(tx);
                Some(rx)
            } else {
                None
            };
            (behavior, release)
        };

        if let Some(release) = release {
            // A dropped sender also releases the open.
            let _ = release.await;
        }

        if let OpenBehavior::Fail(message) = behavior {
            return Err(PortError::io(message));
        }

        let (link, handle) = MockLink::new(port);
        self.state.lock().links.push(handle);
        Ok(Box::new(link))
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("attempts", &state.attempts.len())
            .field("links", &state.links.len())
            .field("held", &state.held.len())
            .finish()
    }
}

#[derive(Debug)]
enum LinkInput {
    Data(Vec<u8>),
    Fail(String),
    HangUp,
}

#[derive(Debug, Default)]
struct MockLinkState {
    writes: Vec<Vec<u8>>,
    closed: bool,
    fail_writes: bool,
}

/// The link half owned by the manager's link task.
pub struct MockLink {
    name: String,
    incoming: mpsc::UnboundedReceiver<LinkInput>,
    /// Bytes of the current chunk not yet handed to a reader.
    pending: VecDeque<u8>,
    state: Arc<Mutex<MockLinkState>>,
}

impl MockLink {
    fn new(name: &str) -> (Self, MockLinkHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MockLinkState::default()));
        let link = Self {
            name: name.to_string(),
            incoming: rx,
            pending: VecDeque::new(),
            state: Arc::clone(&state),
        };
        let handle = MockLinkHandle {
            name: name.to_string(),
            input: tx,
            state,
        };
        (link, handle)
    }

    fn drain_pending(&mut self, buffer: &mut [u8]) -> usize {
        let n = buffer.len().min(self.pending.len());
        for (slot, byte) in buffer.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

#[async_trait]
impl Link for MockLink {
    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        if !self.pending.is_empty() {
            return Ok(self.drain_pending(buffer));
        }
        match self.incoming.recv().await {
            Some(LinkInput::Data(bytes)) => {
                self.pending.extend(bytes);
                Ok(self.drain_pending(buffer))
            }
            Some(LinkInput::Fail(message)) => Err(PortError::io(message)),
            Some(LinkInput::HangUp) | None => Ok(0),
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), PortError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PortError::NotOpen);
        }
        if state.fail_writes {
            return Err(PortError::io("mock write rejected"));
        }
        state.writes.push(data.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PortError> {
        self.state.lock().closed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("name", &self.name)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Test-side controller for one [`MockLink`].
#[derive(Debug, Clone)]
pub struct MockLinkHandle {
    name: String,
    input: mpsc::UnboundedSender<LinkInput>,
    state: Arc<Mutex<MockLinkState>>,
}

impl MockLinkHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make `data` available to the reader. Empty slices are ignored since a
    /// zero-length read means hang-up.
    pub fn feed(&self, data: &[u8]) {
        if !data.is_empty() {
            let _ = self.input.send(LinkInput::Data(data.to_vec()));
        }
    }

    /// Feed `line` followed by `\n`.
    pub fn feed_line(&self, line: &str) {
        self.feed(format!("{line}\n").as_bytes());
    }

    /// Make the next read fail with an I/O error.
    pub fn fail(&self, message: &str) {
        let _ = self.input.send(LinkInput::Fail(message.to_string()));
    }

    /// Make the next read report end-of-stream.
    pub fn hang_up(&self) {
        let _ = self.input.send(LinkInput::HangUp);
    }

    /// Every buffer written to the link, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Reject subsequent writes with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }
}
