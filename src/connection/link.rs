//! The per-open background task.
//!
//! One task is spawned for every open attempt. It awaits the transport, and
//! on success keeps running as the link's only owner: reading bytes into the
//! framer and draining the outbound command queue until the link drops or
//! the manager tells it to stop.

use super::manager::Shared;
use super::ConnectionTarget;
use crate::framing::LineFramer;
use crate::port::{Link, PortError, Transport};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

const READ_CHUNK: usize = 1024;

/// Requests from the manager to the link task.
#[derive(Debug)]
pub(super) enum LinkCommand {
    Write(Vec<u8>),
    Close,
}

/// Why a link task stopped driving its link.
#[derive(Debug)]
pub(super) enum LinkOutcome {
    /// The device reported end-of-stream.
    Closed,
    Failed(PortError),
    /// `end` was called, or every manager handle was dropped.
    Shutdown,
}

pub(super) fn spawn(
    shared: Weak<Shared>,
    transport: Arc<dyn Transport>,
    generation: u64,
    target: ConnectionTarget,
    framer: LineFramer,
) {
    tokio::spawn(run(shared, transport, generation, target, framer));
}

async fn run(
    shared: Weak<Shared>,
    transport: Arc<dyn Transport>,
    generation: u64,
    target: ConnectionTarget,
    framer: LineFramer,
) {
    debug!(port = %target.port, baud_rate = target.baud_rate, generation, "opening link");
    let opened = transport.open(&target.port, target.baud_rate).await;

    let mut link = match opened {
        Ok(link) => link,
        Err(err) => {
            if let Some(manager) = shared.upgrade() {
                manager.open_failed(generation, err);
            }
            return;
        }
    };

    let (outbound, commands) = mpsc::unbounded_channel();
    let accepted = shared
        .upgrade()
        .is_some_and(|manager| manager.open_succeeded(generation, outbound));
    if !accepted {
        debug!(port = %target.port, generation, "discarding superseded link");
        let _ = link.close().await;
        return;
    }

    let outcome = drive(link.as_mut(), commands, &shared, generation, framer).await;
    if let Err(err) = link.close().await {
        trace!(error = %err, "closing link failed");
    }
    debug!(port = %target.port, generation, ?outcome, "link task finished");

    if let Some(manager) = shared.upgrade() {
        manager.link_ended(generation, outcome);
    }
}

async fn drive(
    link: &mut dyn Link,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    shared: &Weak<Shared>,
    generation: u64,
    mut framer: LineFramer,
) -> LinkOutcome {
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Write(bytes)) => {
                    if let Err(err) = link.write_all(&bytes).await {
                        return LinkOutcome::Failed(err);
                    }
                }
                // The sender lives in the manager, so `None` means it is gone.
                Some(LinkCommand::Close) | None => return LinkOutcome::Shutdown,
            },
            read = link.read(&mut buffer) => match read {
                Ok(0) => return LinkOutcome::Closed,
                Ok(n) => {
                    let packets = framer.push(&buffer[..n]);
                    if packets.is_empty() {
                        continue;
                    }
                    match shared.upgrade() {
                        Some(manager) => manager.packets_arrived(generation, packets),
                        None => return LinkOutcome::Shutdown,
                    }
                }
                Err(err) => return LinkOutcome::Failed(err),
            },
        }
    }
}
