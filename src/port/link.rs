//! Core traits for the serial handle owned by a transport.
//!
//! An opened device is a [`SerialLink`]. The transport applies its settings
//! and then splits it: the [`LinkReader`] half moves into the I/O context and
//! is never touched by another thread, the [`LinkWriter`] half stays behind
//! the transport's handle lock.

use super::config::{DataBits, FlowControl, Parity, StopBits};
use super::error::PortError;
use async_trait::async_trait;

/// An opened serial device that has not yet been handed to a transport.
pub trait SerialLink: Send + 'static {
    type Reader: LinkReader;
    type Writer: LinkWriter;

    /// Get the name/path of this serial port.
    fn name(&self) -> &str;

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError>;

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError>;

    fn set_parity(&mut self, parity: Parity) -> Result<(), PortError>;

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), PortError>;

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), PortError>;

    /// Consume the handle, producing independently owned receive and send halves.
    fn split(self) -> Result<(Self::Reader, Self::Writer), PortError>;
}

/// Receive half of a link, driven only by the read loop.
#[async_trait]
pub trait LinkReader: Send + 'static {
    /// Wait for the next chunk of received bytes, at most `buffer.len()`.
    ///
    /// `Ok(0)` means the device reported end of stream.
    async fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;
}

/// Send half of a link.
pub trait LinkWriter: Send + 'static {
    /// Blocking write. Returns the number of bytes the device accepted.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Release the OS handle. Called at most once, after which the writer is dropped.
    fn close(&mut self) -> Result<(), PortError> {
        Ok(())
    }
}

/// Which setting a configuration step touches. Used in logs and by the
/// simulated link to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    BaudRate,
    FlowControl,
    Parity,
    StopBits,
    CharacterSize,
}

impl Setting {
    /// Order in which a transport applies settings on open.
    pub const APPLY_ORDER: [Setting; 5] = [
        Setting::BaudRate,
        Setting::FlowControl,
        Setting::Parity,
        Setting::StopBits,
        Setting::CharacterSize,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Setting::BaudRate => "baud rate",
            Setting::FlowControl => "flow control",
            Setting::Parity => "parity",
            Setting::StopBits => "stop bits",
            Setting::CharacterSize => "character size",
        }
    }
}
