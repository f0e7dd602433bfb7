//! Serial port layer.
//!
//! [`AsyncSerialTransport`] is the entry point: a duplex client over one
//! serial handle with a background read loop. The remaining modules are the
//! pieces it is built from, the [`SerialLink`] seam that lets tests swap the
//! OS driver for [`MockLink`], and the [`TransportLog`] side channel.

pub mod buffer;
pub mod config;
pub mod error;
pub mod link;
pub mod log;
pub mod mock;
pub mod serial_link;
pub mod transport;

pub use buffer::InboundBuffer;
pub use config::{DataBits, FlowControl, Parity, PortConfiguration, StopBits, DEFAULT_BAUD_RATE};
pub use error::PortError;
pub use link::{LinkReader, LinkWriter, SerialLink, Setting};
pub use log::{LogEntry, RecordingLog, TracingLog, TransportLog};
pub use mock::{AppliedSetting, MockLink, MockLinkController, MockReader, MockWriter};
pub use serial_link::{available_ports, LinkTimeouts, PortInfo, PortReader, PortWriter, SerialPortLink};
pub use transport::{AsyncSerialTransport, TransportOptions, DEFAULT_CHUNK_SIZE};
