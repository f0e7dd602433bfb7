use crate::config::ConfigError;
use crate::device::DeviceError;
use crate::port::PortError;
use std::fmt;

/// Unified application error type for the command-line front end.
///
/// Library layers keep their own error enums; this one only exists so `main`
/// can use `?` across all of them and print a single message.
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Device(DeviceError),
    Port(PortError),
    Logging(String),
    InvalidArgument(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration problem: {e}"),
            Self::Device(e) => write!(f, "Device error: {e}"),
            Self::Port(e) => write!(f, "A serial port error occurred: {e}"),
            Self::Logging(details) => write!(f, "Failed to initialize logging: {details}"),
            Self::InvalidArgument(details) => write!(f, "Invalid argument: {details}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Device(e) => Some(e),
            Self::Port(e) => Some(e),
            Self::Logging(_) | Self::InvalidArgument(_) => None,
        }
    }
}

// Implement `From` conversions to allow the `?` operator to work seamlessly.
impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<DeviceError> for AppError {
    fn from(err: DeviceError) -> Self {
        AppError::Device(err)
    }
}

impl From<PortError> for AppError {
    fn from(err: PortError) -> Self {
        AppError::Port(err)
    }
}

/// Result alias used by the binary.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_wraps_source() {
        let err: AppError = DeviceError::TermTimeout.into();
        assert_eq!(
            err.to_string(),
            "Device error: Timed out waiting for the answer terminator"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
