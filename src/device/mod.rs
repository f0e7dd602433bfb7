//! Command/answer access to a serial device.
//!
//! A [`SerialDevice`] wraps one [`AsyncSerialTransport`] and adds what
//! instrument drivers expect on top of a raw byte stream: terminated
//! commands, terminated answers with a timeout, paced transmission, traffic
//! logging and the initialize/shutdown lifecycle.
//!
//! All waiting happens here, by polling the transport's receive buffer. The
//! transport itself never blocks a reader.

pub mod error;
pub mod format;

pub use error::DeviceError;

use crate::config::{Config, MAX_DELAY_BETWEEN_CHARS_MS};
use crate::port::{AsyncSerialTransport, PortConfiguration, TransportLog, TransportOptions};
use crate::registry::Blacklist;
use format::{communication_line, format_ascii, format_binary};
use memchr::memmem;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Sleep between polls of an empty receive buffer.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Delays below this are treated as "write the whole buffer at once".
const MIN_CHAR_DELAY_MS: f64 = 0.001;

/// Creates transports for devices. Tests substitute simulated links here.
pub trait PortOpener: Send + Sync {
    fn open(
        &self,
        config: PortConfiguration,
        options: TransportOptions,
        log: Arc<dyn TransportLog>,
    ) -> AsyncSerialTransport;
}

/// Opens real OS serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(
        &self,
        config: PortConfiguration,
        options: TransportOptions,
        log: Arc<dyn TransportLog>,
    ) -> AsyncSerialTransport {
        AsyncSerialTransport::open(config, options, log)
    }
}

/// Everything a device needs to know before it is initialized.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub port: PortConfiguration,
    pub transport: TransportOptions,
    pub answer_timeout: Duration,
    pub delay_between_chars_ms: f64,
    pub verbose: bool,
    pub non_terminated_answer_timeout: Duration,
}

impl DeviceSettings {
    pub fn new(port: PortConfiguration) -> Self {
        Self {
            port,
            transport: TransportOptions::default(),
            answer_timeout: Duration::from_millis(500),
            delay_between_chars_ms: 0.0,
            verbose: true,
            non_terminated_answer_timeout: Duration::from_secs(5),
        }
    }

    /// Settings for `device` taken from the loaded configuration.
    pub fn from_config(config: &Config, device: &str) -> Self {
        Self {
            port: config.serial.port_configuration(device),
            transport: config.transport.options(),
            answer_timeout: Duration::from_millis(config.device.answer_timeout_ms),
            delay_between_chars_ms: config.device.delay_between_chars_ms,
            verbose: config.device.verbose,
            non_terminated_answer_timeout: Duration::from_millis(
                config.device.non_terminated_answer_timeout_ms,
            ),
        }
    }
}

/// One serial port as seen by instrument drivers.
pub struct SerialDevice {
    name: String,
    settings: Mutex<DeviceSettings>,
    transport: Mutex<Option<Arc<AsyncSerialTransport>>>,
    opener: Arc<dyn PortOpener>,
    blacklist: Arc<Blacklist>,
    log: Arc<dyn TransportLog>,
}

impl SerialDevice {
    pub fn new(
        settings: DeviceSettings,
        opener: Arc<dyn PortOpener>,
        blacklist: Arc<Blacklist>,
        log: Arc<dyn TransportLog>,
    ) -> Self {
        Self {
            name: settings.port.device.clone(),
            settings: Mutex::new(settings),
            transport: Mutex::new(None),
            opener,
            blacklist,
            log,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> DeviceSettings {
        self.settings.lock().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.transport.lock().is_some()
    }

    /// Change the link parameters. Only allowed before [`initialize`](Self::initialize).
    pub fn set_port_configuration(&self, port: PortConfiguration) -> Result<(), DeviceError> {
        if self.is_initialized() {
            return Err(DeviceError::invalid_setting(
                "port configuration",
                "cannot be changed while the port is open",
            ));
        }
        if port.device != self.name {
            return Err(DeviceError::invalid_setting(
                "device",
                format!("expected {}, got {}", self.name, port.device),
            ));
        }
        self.settings.lock().port = port;
        Ok(())
    }

    pub fn set_answer_timeout(&self, timeout: Duration) {
        self.settings.lock().answer_timeout = timeout;
    }

    pub fn set_delay_between_chars_ms(&self, delay_ms: f64) -> Result<(), DeviceError> {
        if !(0.0..MAX_DELAY_BETWEEN_CHARS_MS).contains(&delay_ms) {
            return Err(DeviceError::invalid_setting(
                "delay between characters",
                format!("{} ms is outside [0, {})", delay_ms, MAX_DELAY_BETWEEN_CHARS_MS),
            ));
        }
        self.settings.lock().delay_between_chars_ms = delay_ms;
        Ok(())
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.settings.lock().verbose = verbose;
    }

    /// Open the port. Does nothing if it is already open.
    pub fn initialize(&self) -> Result<(), DeviceError> {
        let mut slot = self.transport.lock();
        if slot.is_some() {
            return Ok(());
        }
        if self.blacklist.contains(&self.name) {
            return Err(DeviceError::Blacklisted(self.name.clone()));
        }

        let settings = self.settings();
        let transport = self
            .opener
            .open(settings.port, settings.transport, Arc::clone(&self.log));
        if !transport.is_active() {
            return Err(DeviceError::OpenFailed(self.name.clone()));
        }

        *slot = Some(Arc::new(transport));
        Ok(())
    }

    /// Close the port and wait for its read loop to stop.
    ///
    /// A port whose read loop does not stop in time is blacklisted.
    pub fn shutdown(&self) -> Result<(), DeviceError> {
        let Some(transport) = self.transport.lock().take() else {
            return Ok(());
        };

        if transport.shutdown() {
            return Ok(());
        }

        self.blacklist.insert(&self.name);
        Err(DeviceError::ShutdownTimedOut(self.name.clone()))
    }

    fn transport(&self) -> Result<Arc<AsyncSerialTransport>, DeviceError> {
        self.transport
            .lock()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| DeviceError::NotInitialized(self.name.clone()))
    }

    /// Send `command` followed by `terminator`.
    pub fn set_command(&self, command: &str, terminator: &str) -> Result<(), DeviceError> {
        let transport = self.transport()?;

        let mut text = String::with_capacity(command.len() + terminator.len());
        text.push_str(command);
        text.push_str(terminator);
        if text.is_empty() {
            return Ok(());
        }

        let delay_ms = self.settings.lock().delay_between_chars_ms;
        self.transmit(&transport, text.as_bytes(), delay_ms)?;
        self.log.log_message(
            &communication_line("SetCommand", false, &format_ascii(text.as_bytes())),
            true,
        );
        Ok(())
    }

    /// Collect received bytes until `terminator` shows up; the terminator is stripped.
    ///
    /// With an empty terminator whatever arrived is returned once the
    /// non-terminated timeout has passed, provided that is shorter than the
    /// answer timeout. `max_len` bounds the answer including the terminator.
    pub fn get_answer(&self, max_len: usize, terminator: &str) -> Result<String, DeviceError> {
        let transport = self.transport()?;
        if max_len == 0 {
            self.log.log_message("BUFFER_OVERRUN error occurred", false);
            return Err(DeviceError::BufferOverrun);
        }

        let (answer_timeout, non_terminated_timeout) = {
            let settings = self.settings.lock();
            (settings.answer_timeout, settings.non_terminated_answer_timeout)
        };
        let finder = (!terminator.is_empty()).then(|| memmem::Finder::new(terminator.as_bytes()));

        let start = Instant::now();
        let mut answer: Vec<u8> = Vec::new();

        while start.elapsed() < answer_timeout {
            match transport.read_one_character() {
                Some(byte) => {
                    if answer.len() >= max_len {
                        self.log.log_message("BUFFER_OVERRUN error occurred", false);
                        return Err(DeviceError::BufferOverrun);
                    }
                    answer.push(byte);
                }
                None => thread::sleep(POLL_INTERVAL),
            }

            match &finder {
                Some(finder) => {
                    if let Some(pos) = finder.find(&answer) {
                        self.log.log_message(
                            &communication_line("GetAnswer", true, &format_ascii(&answer)),
                            true,
                        );
                        answer.truncate(pos);
                        return Ok(String::from_utf8_lossy(&answer).into_owned());
                    }
                }
                None => {
                    let elapsed = start.elapsed();
                    if elapsed > non_terminated_timeout {
                        self.log.log_message(
                            &communication_line("GetAnswer", true, &format_ascii(&answer)),
                            true,
                        );
                        self.log.log_message(
                            &format!(
                                "GetAnswer without terminator returning after {} ms",
                                elapsed.as_millis()
                            ),
                            true,
                        );
                        return Ok(String::from_utf8_lossy(&answer).into_owned());
                    }
                }
            }
        }

        self.log.log_message("TERM_TIMEOUT error occurred", false);
        Err(DeviceError::TermTimeout)
    }

    /// Send raw bytes.
    pub fn write(&self, data: &[u8]) -> Result<(), DeviceError> {
        let transport = self.transport()?;
        if data.is_empty() {
            return Ok(());
        }

        let (delay_ms, verbose) = {
            let settings = self.settings.lock();
            (settings.delay_between_chars_ms, settings.verbose)
        };
        self.transmit(&transport, data, delay_ms)?;
        if verbose {
            self.log_binary("Write", false, data);
        }
        Ok(())
    }

    /// Take whatever has been received, up to `buf.len()` bytes. Never waits.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let transport = self.transport()?;
        if buf.is_empty() {
            return Err(DeviceError::BufferOverrun);
        }

        let count = transport.read_available(buf);
        if count > 0 && self.settings.lock().verbose {
            self.log_binary("Read", true, &buf[..count]);
        }
        Ok(count)
    }

    /// Number of received bytes waiting to be read.
    pub fn bytes_available(&self) -> Result<usize, DeviceError> {
        Ok(self.transport()?.bytes_available())
    }

    /// Drop received bytes nobody has read yet.
    pub fn purge(&self) -> Result<(), DeviceError> {
        self.transport()?.purge();
        Ok(())
    }

    fn transmit(
        &self,
        transport: &AsyncSerialTransport,
        data: &[u8],
        delay_ms: f64,
    ) -> Result<(), DeviceError> {
        if delay_ms < MIN_CHAR_DELAY_MS {
            if !transport.write_characters(data) {
                return Err(DeviceError::WriteFailed(self.name.clone()));
            }
            return Ok(());
        }

        // Rounded to whole milliseconds.
        let pause = Duration::from_millis((0.5 + delay_ms) as u64);
        for &byte in data {
            if !transport.write_one_character(byte) {
                return Err(DeviceError::WriteFailed(self.name.clone()));
            }
            thread::sleep(pause);
        }
        Ok(())
    }

    fn log_binary(&self, prefix: &str, is_input: bool, data: &[u8]) {
        let body = format!("(hex) {}", format_binary(data));
        self.log
            .log_message(&communication_line(prefix, is_input, &body), true);
    }
}

impl Drop for SerialDevice {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(port = %self.name, "{}", e);
        }
    }
}

impl std::fmt::Debug for SerialDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDevice")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
