//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use crate::port::{FlowControl, Parity, StopBits};
use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_TRANSPORT";

/// Config file name
const CONFIG_FILE_NAME: &str = "serial-transport.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_TRANSPORT_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_TRANSPORT_CONFIG` environment variable (explicit path)
    /// 2. `./serial-transport.toml` (current directory)
    /// 3. `serial-transport.toml` in the platform config directory
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables can override any config file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        if let Err(e) = apply_env_overrides(&mut config) {
            tracing::warn!("Ignoring environment overrides: {}", e);
            config = Config::default();
        }

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to file.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("No config file path set".to_string()))?;

        save_to_file(&self.config, path)
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. Platform config directory
    if let Some(app_config) = get_default_config_path() {
        if app_config.exists() {
            return Some(app_config);
        }
    }

    // 4. No config file found - will use defaults
    None
}

/// Get the default config directory for creating new config files.
pub fn get_default_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "serial-transport")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Save configuration to a file.
fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

fn env_var(key: &str) -> (String, Option<String>) {
    let name = format!("{}_{}", ENV_PREFIX, key);
    let value = std::env::var(&name).ok();
    (name, value)
}

fn override_parsed<T: FromStr>(target: &mut T, key: &str, what: &str) -> ConfigResult<()> {
    if let (name, Some(val)) = env_var(key) {
        *target = val
            .trim()
            .parse()
            .map_err(|_| ConfigError::env_parse(name, format!("Invalid {}", what)))?;
    }
    Ok(())
}

/// Enum settings use the same spelling as the TOML file (`"even"`, `"hardware"`).
fn override_enum<T: for<'de> Deserialize<'de>>(target: &mut T, key: &str) -> ConfigResult<()> {
    if let (name, Some(val)) = env_var(key) {
        let lowered = val.trim().to_lowercase();
        *target = T::deserialize(StrDeserializer::<ValueError>::new(&lowered))
            .map_err(|e| ConfigError::env_parse(name, e.to_string()))?;
    }
    Ok(())
}

fn override_bool(target: &mut bool, key: &str) {
    if let (_, Some(val)) = env_var(key) {
        *target = val.eq_ignore_ascii_case("true") || val == "1";
    }
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `SERIAL_TRANSPORT_<SECTION>_<KEY>`
/// For example:
/// - `SERIAL_TRANSPORT_SERIAL_BAUD_RATE=115200`
/// - `SERIAL_TRANSPORT_DEVICE_ANSWER_TIMEOUT_MS=2000`
/// - `SERIAL_TRANSPORT_LOGGING_FORMAT=json`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    override_parsed(&mut config.serial.baud_rate, "SERIAL_BAUD_RATE", "baud rate")?;
    override_enum::<FlowControl>(&mut config.serial.flow_control, "SERIAL_FLOW_CONTROL")?;
    override_enum::<Parity>(&mut config.serial.parity, "SERIAL_PARITY")?;
    override_enum::<StopBits>(&mut config.serial.stop_bits, "SERIAL_STOP_BITS")?;

    // Transport overrides
    override_parsed(&mut config.transport.chunk_size, "TRANSPORT_CHUNK_SIZE", "chunk size")?;
    override_parsed(&mut config.transport.read_yield_ms, "TRANSPORT_READ_YIELD_MS", "duration")?;
    override_parsed(
        &mut config.transport.close_timeout_ms,
        "TRANSPORT_CLOSE_TIMEOUT_MS",
        "timeout",
    )?;
    override_parsed(&mut config.transport.read_poll_ms, "TRANSPORT_READ_POLL_MS", "duration")?;
    override_parsed(
        &mut config.transport.write_timeout_ms,
        "TRANSPORT_WRITE_TIMEOUT_MS",
        "timeout",
    )?;

    // Device overrides
    override_parsed(
        &mut config.device.answer_timeout_ms,
        "DEVICE_ANSWER_TIMEOUT_MS",
        "timeout",
    )?;
    override_parsed(
        &mut config.device.delay_between_chars_ms,
        "DEVICE_DELAY_BETWEEN_CHARS_MS",
        "delay",
    )?;
    override_bool(&mut config.device.verbose, "DEVICE_VERBOSE");
    override_parsed(
        &mut config.device.non_terminated_answer_timeout_ms,
        "DEVICE_NON_TERMINATED_ANSWER_TIMEOUT_MS",
        "timeout",
    )?;

    // Registry overrides
    override_parsed(
        &mut config.registry.port_list_ttl_secs,
        "REGISTRY_PORT_LIST_TTL_SECS",
        "duration",
    )?;

    // Logging overrides
    if let (_, Some(val)) = env_var("LOGGING_LEVEL") {
        config.logging.level = val;
    }
    override_enum::<LogFormat>(&mut config.logging.format, "LOGGING_FORMAT")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.baud_rate, 9600);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("SERIAL_TRANSPORT_SERIAL_BAUD_RATE", "19200");
        env::set_var("SERIAL_TRANSPORT_SERIAL_PARITY", "Odd");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.baud_rate, 19200);
        assert_eq!(loader.config().serial.parity, Parity::Odd);

        env::remove_var("SERIAL_TRANSPORT_SERIAL_BAUD_RATE");
        env::remove_var("SERIAL_TRANSPORT_SERIAL_PARITY");
    }

    #[test]
    #[serial]
    fn test_bad_env_value_is_reported() {
        env::set_var("SERIAL_TRANSPORT_DEVICE_ANSWER_TIMEOUT_MS", "soon");

        let mut config = Config::default();
        let err = apply_env_overrides(&mut config).unwrap_err();
        assert!(matches!(err, ConfigError::EnvParseError { .. }));

        env::remove_var("SERIAL_TRANSPORT_DEVICE_ANSWER_TIMEOUT_MS");
    }
}
