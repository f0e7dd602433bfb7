//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::port::{
    FlowControl, LinkTimeouts, Parity, PortConfiguration, StopBits, TransportOptions,
    DEFAULT_BAUD_RATE, DEFAULT_CHUNK_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Upper bound (exclusive) for the pause between single-character writes.
pub const MAX_DELAY_BETWEEN_CHARS_MS: f64 = 250.0;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Link parameters used for newly opened ports
    pub serial: SerialConfig,
    /// Read loop and I/O context tuning
    pub transport: TransportConfig,
    /// Command/answer behaviour of a device
    pub device: DeviceConfig,
    /// Shared port bookkeeping
    pub registry: RegistryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values serde cannot constrain on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::validation(
                "serial.baud_rate",
                "must be greater than zero",
            ));
        }
        if self.transport.chunk_size == 0 {
            return Err(ConfigError::validation(
                "transport.chunk_size",
                "must be greater than zero",
            ));
        }
        let delay = self.device.delay_between_chars_ms;
        if !(0.0..MAX_DELAY_BETWEEN_CHARS_MS).contains(&delay) {
            return Err(ConfigError::validation(
                "device.delay_between_chars_ms",
                format!("must be in [0, {})", MAX_DELAY_BETWEEN_CHARS_MS),
            ));
        }
        Ok(())
    }
}

/// Serial link section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate for new connections
    pub baud_rate: u32,
    pub flow_control: FlowControl,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Link parameters for `device` (after alias resolution).
    pub fn port_configuration(&self, device: &str) -> PortConfiguration {
        PortConfiguration::new(self.resolve_port(device))
            .with_baud_rate(self.baud_rate)
            .with_flow_control(self.flow_control)
            .with_parity(self.parity)
            .with_stop_bits(self.stop_bits)
    }
}

/// Transport section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum bytes requested per read
    pub chunk_size: usize,
    /// Pause after each received chunk
    pub read_yield_ms: u64,
    /// How long a shutdown waits for the read loop to stop
    pub close_timeout_ms: u64,
    /// Poll interval of a blocking OS read
    pub read_poll_ms: u64,
    /// Upper bound for one blocking OS write
    pub write_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_yield_ms: 1,
            close_timeout_ms: 1000,
            read_poll_ms: 50,
            write_timeout_ms: 1000,
        }
    }
}

impl TransportConfig {
    pub fn options(&self) -> TransportOptions {
        TransportOptions {
            chunk_size: self.chunk_size,
            read_yield: Duration::from_millis(self.read_yield_ms),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
            link_timeouts: LinkTimeouts {
                read_poll: Duration::from_millis(self.read_poll_ms),
                write: Duration::from_millis(self.write_timeout_ms),
            },
        }
    }
}

/// Device section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// How long `get_answer` waits for a terminator
    pub answer_timeout_ms: u64,
    /// Pause between characters of a command; 0 writes the command in one go
    pub delay_between_chars_ms: f64,
    /// Log every transfer
    pub verbose: bool,
    /// How long `get_answer` collects bytes when no terminator is given
    pub non_terminated_answer_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            answer_timeout_ms: 500,
            delay_between_chars_ms: 0.0,
            verbose: true,
            non_terminated_answer_timeout_ms: 5000,
        }
    }
}

/// Registry section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long a listed set of ports stays valid
    pub port_list_ttl_secs: u64,
    /// Only list ports whose name contains one of these; empty lists everything
    pub port_name_filter: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            port_list_ttl_secs: 15,
            port_name_filter: Vec::new(),
        }
    }
}

impl RegistryConfig {
    pub fn port_list_ttl(&self) -> Duration {
        Duration::from_secs(self.port_list_ttl_secs)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.transport.chunk_size, 512);
        assert_eq!(config.device.answer_timeout_ms, 500);
        assert!(config.device.verbose);
        assert_eq!(config.registry.port_list_ttl_secs, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_alias_resolution() {
        let mut config = SerialConfig::default();
        config
            .port_aliases
            .insert("stage".to_string(), "/dev/ttyUSB3".to_string());

        assert_eq!(config.resolve_port("stage"), "/dev/ttyUSB3");
        assert_eq!(config.resolve_port("COM5"), "COM5");
        assert_eq!(config.port_configuration("stage").device, "/dev/ttyUSB3");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[serial]"));
        assert!(toml_str.contains("[transport]"));
        assert!(toml_str.contains("[device]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [serial]
            baud_rate = 115200
            parity = "even"

            [device]
            delay_between_chars_ms = 2.5
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.parity, Parity::Even);
        assert_eq!(config.device.delay_between_chars_ms, 2.5);
        // Defaults should still work
        assert_eq!(config.transport.close_timeout_ms, 1000);
    }

    #[test]
    fn test_transport_options() {
        let options = TransportConfig::default().options();
        assert_eq!(options, TransportOptions::default());
    }

    #[test]
    fn test_validation_rejects_long_delay() {
        let mut config = Config::default();
        config.device.delay_between_chars_ms = 250.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}
