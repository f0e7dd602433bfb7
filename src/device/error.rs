//! Errors returned by [`SerialDevice`](super::SerialDevice) operations.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("Serial port {0} is not initialized")]
    NotInitialized(String),

    /// An earlier shutdown of this port hung; it is not reopened in this process.
    #[error("Serial port {0} is blacklisted")]
    Blacklisted(String),

    #[error("Failed to open serial port {0}")]
    OpenFailed(String),

    #[error("Answer buffer overrun")]
    BufferOverrun,

    #[error("Timed out waiting for the answer terminator")]
    TermTimeout,

    #[error("Failed to write to serial port {0}")]
    WriteFailed(String),

    #[error("Invalid value for {setting}: {message}")]
    InvalidSetting { setting: String, message: String },

    #[error("Serial port {0} did not close in time")]
    ShutdownTimedOut(String),
}

impl DeviceError {
    pub fn invalid_setting(setting: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting: setting.into(),
            message: message.into(),
        }
    }
}
