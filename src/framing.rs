//! Line framing for the incoming byte stream.
//!
//! Bytes arrive in arbitrary chunks; the framer accumulates them and emits
//! one [`Packet`] per delimiter. The delimiter itself is not part of the
//! packet, and neither is a `\r` immediately before it, so CRLF devices and
//! LF devices look the same to consumers.

use crate::packet::Packet;
use memchr::memmem;
use tracing::warn;

/// Splits a byte stream into packets at a delimiter.
#[derive(Debug, Clone)]
pub struct LineFramer {
    buffer: Vec<u8>,
    delimiter: Vec<u8>,
    max_line_bytes: usize,
}

impl LineFramer {
    pub const DEFAULT_DELIMITER: &'static [u8] = b"\n";
    pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

    pub fn new() -> Self {
        Self::with_delimiter(Self::DEFAULT_DELIMITER, Self::DEFAULT_MAX_LINE_BYTES)
    }

    /// An empty delimiter falls back to `\n`. A line that grows past
    /// `max_line_bytes` without a delimiter is flushed as a packet on its own.
    pub fn with_delimiter(delimiter: impl Into<Vec<u8>>, max_line_bytes: usize) -> Self {
        let mut delimiter = delimiter.into();
        if delimiter.is_empty() {
            delimiter = Self::DEFAULT_DELIMITER.to_vec();
        }
        Self {
            buffer: Vec::with_capacity(1024),
            delimiter,
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Feed a chunk and collect every packet it completes, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Packet> {
        self.buffer.extend_from_slice(bytes);

        let mut packets = Vec::new();
        let mut start = 0;
        while let Some(pos) = memmem::find(&self.buffer[start..], &self.delimiter) {
            let mut line = &self.buffer[start..start + pos];
            if let [head @ .., b'\r'] = line {
                line = head;
            }
            packets.push(Packet::from_bytes(line));
            start += pos + self.delimiter.len();
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_line_bytes {
            warn!(
                bytes = self.buffer.len(),
                limit = self.max_line_bytes,
                "line exceeded limit without delimiter, flushing"
            );
            packets.push(Packet::from_bytes(&self.buffer));
            self.buffer.clear();
        }

        packets
    }

    /// Drop any partial line, e.g. when a new link is opened.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes held while waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}
