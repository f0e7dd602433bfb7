//! Configuration module for serial-transport.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_TRANSPORT_CONFIG` environment variable (explicit path)
//! 2. `./serial-transport.toml` (current directory)
//! 3. `serial-transport.toml` in the platform config directory
//!    (`~/.config/serial-transport/` on Linux, `%APPDATA%` on Windows)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Any configuration value can be overridden via environment variables.
//! The pattern is: `SERIAL_TRANSPORT_<SECTION>_<KEY>`
//!
//! Examples:
//! - `SERIAL_TRANSPORT_SERIAL_BAUD_RATE=115200`
//! - `SERIAL_TRANSPORT_TRANSPORT_CLOSE_TIMEOUT_MS=2000`
//! - `SERIAL_TRANSPORT_DEVICE_VERBOSE=false`
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_transport::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("Default baud: {}", config.serial.baud_rate);
//! println!("Answer timeout: {} ms", config.device.answer_timeout_ms);
//! # Ok::<(), serial_transport::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, DeviceConfig, LogFormat, LoggingConfig, RegistryConfig, SerialConfig,
    TransportConfig, MAX_DELAY_BETWEEN_CHARS_MS,
};
