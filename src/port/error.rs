//! Port-specific error types.
//!
//! These stay below the transport boundary: the transport itself never returns
//! them to callers, it turns them into log messages and state changes.

use thiserror::Error;

/// Errors reported by a serial link while opening, configuring or moving bytes.
#[derive(Debug, Error)]
pub enum PortError {
    /// The specified serial port was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// Another process (or another handle of ours) holds the port exclusively.
    #[error("Serial port busy: {0}")]
    Busy(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The driver rejected a setting.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The platform driver has no way to express the requested setting.
    #[error("Unsupported setting: {0}")]
    Unsupported(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Attempted to use a handle that has already been released.
    #[error("Port is not open")]
    NotOpen,

    /// The device went away (end of stream on the receive side).
    #[error("Port disconnected: {0}")]
    Disconnected(String),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Busy error from a port name.
    pub fn busy(port_name: impl Into<String>) -> Self {
        Self::Busy(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an Unsupported error from a message.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Create a Timeout error from a duration.
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout(duration)
    }

    /// Create a Disconnected error from a port name.
    pub fn disconnected(port_name: impl Into<String>) -> Self {
        Self::Disconnected(port_name.into())
    }

    /// Map a `serialport` open failure onto our taxonomy.
    pub(crate) fn from_open(port_name: &str, err: serialport::Error) -> Self {
        match err.kind() {
            // serialport reports EBUSY and a held flock as NoDevice too.
            serialport::ErrorKind::NoDevice if is_busy(&err.description) => {
                Self::busy(port_name)
            }
            serialport::ErrorKind::NoDevice => Self::not_found(port_name),
            serialport::ErrorKind::InvalidInput => Self::config(err.to_string()),
            _ => Self::Serial(err),
        }
    }
}

fn is_busy(description: &str) -> bool {
    let description = description.to_ascii_lowercase();
    description.contains("busy") || description.contains("exclusive lock")
}
