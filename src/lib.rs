//! Serial Transport Library
//!
//! Full-duplex serial port access for instrument control: a transport that
//! keeps reading in the background while any thread writes, and a device
//! layer that speaks terminated command/answer protocols on top of it.
//!
//! # Modules
//!
//! - `port`: the asynchronous transport, the serial link seam and its implementations
//! - `device`: command/answer device layer and traffic formatting
//! - `registry`: shared, reference-counted devices and the cached port list
//! - `config`: configuration management with TOML support
//! - `logging`: tracing subscriber setup
//! - `error`: unified error handling for the binary

pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod port;
pub mod registry;

// Re-export commonly used types for convenience
pub use device::{DeviceError, DeviceSettings, PortOpener, SerialDevice, SystemPortOpener};
pub use error::{AppError, AppResult};
pub use port::{
    AsyncSerialTransport, DataBits, FlowControl, Parity, PortConfiguration, PortError,
    StopBits, TransportLog, TransportOptions,
};
pub use registry::{Blacklist, PortLister, PortRegistry};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
