//! Native serial transport built on tokio-serial.
//!
//! Every open produces a fresh `SerialStream`; reconnecting never reuses a
//! stale OS handle.

use super::error::PortError;
use super::traits::{Link, Transport};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialStream;
use tracing::debug;

/// Transport that opens real serial ports (8N1, no flow control).
#[derive(Debug, Clone, Default)]
pub struct TokioSerialTransport;

impl TokioSerialTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TokioSerialTransport {
    async fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Link>, PortError> {
        let builder = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .flow_control(tokio_serial::FlowControl::None)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One);

        let stream = SerialStream::open(&builder).map_err(|e| match e.kind {
            tokio_serial::ErrorKind::NoDevice => PortError::not_found(port),
            tokio_serial::ErrorKind::InvalidInput => PortError::config(e.to_string()),
            _ => PortError::io(e.to_string()),
        })?;

        debug!(port, baud_rate, "serial stream opened");
        Ok(Box::new(SerialLink {
            stream: Some(stream),
            name: port.to_string(),
        }))
    }
}

/// A single open tokio-serial stream.
pub struct SerialLink {
    stream: Option<SerialStream>,
    name: String,
}

impl SerialLink {
    fn stream(&mut self) -> Result<&mut SerialStream, PortError> {
        self.stream.as_mut().ok_or(PortError::NotOpen)
    }
}

#[async_trait]
impl Link for SerialLink {
    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        self.stream()?.read(buffer).await.map_err(PortError::Io)
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), PortError> {
        let stream = self.stream()?;
        stream.write_all(data).await?;
        stream.flush().await.map_err(PortError::Io)
    }

    async fn close(&mut self) -> Result<(), PortError> {
        // Dropping the stream releases the OS handle.
        if self.stream.take().is_some() {
            debug!(port = %self.name, "serial stream closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("name", &self.name)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let transport = TokioSerialTransport::new();
        let result = transport
            .open("/dev/nonexistent_persistent_serial_12345", 9600)
            .await;

        assert!(result.is_err());
    }
}
