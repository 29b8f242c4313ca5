//! Capability contracts between the connection manager and the physical link.
//!
//! The manager never touches an OS handle directly. It asks a [`Transport`]
//! for a [`Link`] and then drives that link from a single background task, so
//! implementations only need `Send`, not `Sync`, on the link side.

use super::error::PortError;
use async_trait::async_trait;
use std::fmt;

/// Opens physical links by port identifier and baud rate.
///
/// A transport is shared by every open attempt of one manager, including the
/// retries issued by the reconnect timer.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Open `port` at `baud_rate`.
    ///
    /// Returning an error counts as a failed attempt: the manager fires its
    /// *error* event and schedules the next retry when persistence is on.
    async fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Link>, PortError>;
}

/// An established, exclusively owned serial link.
#[async_trait]
pub trait Link: Send + fmt::Debug {
    /// Read whatever bytes are available into `buffer`.
    ///
    /// `Ok(0)` means the remote end hung up. Must be cancellation safe: the
    /// link task races this future against its outbound command queue.
    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Write every byte of `data`.
    async fn write_all(&mut self, data: &[u8]) -> Result<(), PortError>;

    /// Release the underlying handle. Called exactly once by the link task.
    async fn close(&mut self) -> Result<(), PortError>;

    /// The port name/path this link was opened on.
    fn name(&self) -> &str;
}
