//! Simulated serial link for testing.
//!
//! Provides a [`MockLink`] that behaves like an opened device without any
//! hardware, plus a [`MockLinkController`] that stays with the test to push
//! received chunks, inject faults and inspect what the transport did.

use super::config::{DataBits, FlowControl, Parity, StopBits};
use super::error::PortError;
use super::link::{LinkReader, LinkWriter, SerialLink, Setting};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What the simulated device does next on its receive side.
#[derive(Debug)]
enum Inbound {
    Chunk(Vec<u8>),
    Fail(std::io::ErrorKind),
    HangUp,
}

/// A setting value the transport applied, in the order it was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedSetting {
    BaudRate(u32),
    FlowControl(FlowControl),
    Parity(Parity),
    StopBits(StopBits),
    CharacterSize(DataBits),
}

impl AppliedSetting {
    pub fn setting(&self) -> Setting {
        match self {
            AppliedSetting::BaudRate(_) => Setting::BaudRate,
            AppliedSetting::FlowControl(_) => Setting::FlowControl,
            AppliedSetting::Parity(_) => Setting::Parity,
            AppliedSetting::StopBits(_) => Setting::StopBits,
            AppliedSetting::CharacterSize(_) => Setting::CharacterSize,
        }
    }
}

/// Inner state of the mock link, protected by a mutex for interior mutability.
#[derive(Debug, Default)]
struct MockLinkState {
    /// Every attempted setting, successful or not.
    applied: Vec<AppliedSetting>,
    /// Settings that fail when the transport tries to apply them.
    failing: HashSet<Setting>,
    /// Log of all bytes accepted by the writer, one entry per write call.
    write_log: Vec<Vec<u8>>,
    /// Accept at most this many bytes per write call.
    write_limit: Option<usize>,
    /// Fail the next write with an I/O error.
    fail_next_write: bool,
    /// Loop written bytes back to the receive side.
    echo: bool,
    close_count: usize,
}

/// Mock serial link.
///
/// # Example
/// ```
/// use serial_transport::port::{
///     AsyncSerialTransport, MockLink, PortConfiguration, RecordingLog, TransportOptions,
/// };
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let (link, controller) = MockLink::new("MOCK0");
/// controller.set_echo(true);
///
/// let transport = AsyncSerialTransport::with_link(
///     Ok(link),
///     PortConfiguration::new("MOCK0"),
///     TransportOptions::default(),
///     Arc::new(RecordingLog::new()),
/// );
/// assert!(transport.write_characters(b"OK"));
///
/// // Wait for the read loop to deliver the echo.
/// let deadline = std::time::Instant::now() + Duration::from_secs(2);
/// while transport.bytes_available() < 2 && std::time::Instant::now() < deadline {
///     std::thread::sleep(Duration::from_millis(1));
/// }
/// assert_eq!(transport.read_one_character(), Some(b'O'));
/// assert_eq!(controller.write_log(), vec![b"OK".to_vec()]);
/// ```
pub struct MockLink {
    name: String,
    state: Arc<Mutex<MockLinkState>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
}

/// Test-side handle of a [`MockLink`].
#[derive(Clone)]
pub struct MockLinkController {
    name: String,
    state: Arc<Mutex<MockLinkState>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl MockLink {
    /// Create a new mock link and its controller.
    pub fn new(name: impl Into<String>) -> (Self, MockLinkController) {
        let name = name.into();
        let state = Arc::new(Mutex::new(MockLinkState::default()));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let controller = MockLinkController {
            name: name.clone(),
            state: Arc::clone(&state),
            inbound_tx: inbound_tx.clone(),
        };
        let link = Self {
            name,
            state,
            inbound_tx,
            inbound_rx,
        };
        (link, controller)
    }

    fn apply(&self, applied: AppliedSetting) -> Result<(), PortError> {
        let mut state = self.state.lock();
        state.applied.push(applied);
        if state.failing.contains(&applied.setting()) {
            return Err(PortError::config(format!(
                "{} rejected: {:?}",
                applied.setting().label(),
                applied
            )));
        }
        Ok(())
    }
}

impl SerialLink for MockLink {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        self.apply(AppliedSetting::BaudRate(baud_rate))?;
        if baud_rate == 0 {
            return Err(PortError::config("baud rate must be positive"));
        }
        Ok(())
    }

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError> {
        self.apply(AppliedSetting::FlowControl(flow_control))
    }

    fn set_parity(&mut self, parity: Parity) -> Result<(), PortError> {
        self.apply(AppliedSetting::Parity(parity))
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), PortError> {
        self.apply(AppliedSetting::StopBits(stop_bits))
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), PortError> {
        self.apply(AppliedSetting::CharacterSize(data_bits))
    }

    fn split(self) -> Result<(MockReader, MockWriter), PortError> {
        let reader = MockReader {
            inbound_rx: self.inbound_rx,
            pending: VecDeque::new(),
        };
        let writer = MockWriter {
            state: self.state,
            inbound_tx: self.inbound_tx,
            closed: false,
        };
        Ok((reader, writer))
    }
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink").field("name", &self.name).finish()
    }
}

impl MockLinkController {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver one received chunk to the read loop.
    pub fn deliver(&self, chunk: &[u8]) {
        let _ = self.inbound_tx.send(Inbound::Chunk(chunk.to_vec()));
    }

    /// Make the pending read complete with an I/O error, as an unplugged adapter would.
    pub fn disconnect(&self) {
        let _ = self
            .inbound_tx
            .send(Inbound::Fail(std::io::ErrorKind::BrokenPipe));
    }

    /// Make the pending read report end of stream.
    pub fn hang_up(&self) {
        let _ = self.inbound_tx.send(Inbound::HangUp);
    }

    /// Loop written bytes back as received chunks.
    pub fn set_echo(&self, echo: bool) {
        self.state.lock().echo = echo;
    }

    /// Make the given setting fail when applied.
    pub fn fail_setting(&self, setting: Setting) {
        self.state.lock().failing.insert(setting);
    }

    /// Accept at most `limit` bytes per write call.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.state.lock().write_limit = limit;
    }

    /// Fail the next write with an I/O error.
    pub fn fail_next_write(&self) {
        self.state.lock().fail_next_write = true;
    }

    /// Get a copy of all data accepted by the writer.
    pub fn write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// All bytes written so far, concatenated.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state.lock().write_log.concat()
    }

    pub fn applied_settings(&self) -> Vec<AppliedSetting> {
        self.state.lock().applied.clone()
    }

    /// How many times the handle was released.
    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }
}

/// Receive half of a [`MockLink`].
pub struct MockReader {
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    pending: VecDeque<u8>,
}

#[async_trait]
impl LinkReader for MockReader {
    async fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        if self.pending.is_empty() {
            match self.inbound_rx.recv().await {
                Some(Inbound::Chunk(bytes)) => self.pending.extend(bytes),
                Some(Inbound::Fail(kind)) => {
                    return Err(PortError::Io(std::io::Error::new(
                        kind,
                        "simulated link failure",
                    )))
                }
                Some(Inbound::HangUp) | None => return Ok(0),
            }
        }

        let count = buffer.len().min(self.pending.len());
        for (slot, byte) in buffer.iter_mut().zip(self.pending.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

/// Send half of a [`MockLink`].
pub struct MockWriter {
    state: Arc<Mutex<MockLinkState>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    closed: bool,
}

impl LinkWriter for MockWriter {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        if self.closed {
            return Err(PortError::NotOpen);
        }

        let mut state = self.state.lock();
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated write failure",
            )));
        }

        let accepted = state.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        let written = data[..accepted].to_vec();
        state.write_log.push(written.clone());

        if state.echo && !written.is_empty() {
            let _ = self.inbound_tx.send(Inbound::Chunk(written));
        }
        Ok(accepted)
    }

    fn close(&mut self) -> Result<(), PortError> {
        if self.closed {
            return Err(PortError::NotOpen);
        }
        self.closed = true;
        self.state.lock().close_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_deliver_and_read() {
        let (link, controller) = MockLink::new("MOCK0");
        let (mut reader, _writer) = link.split().unwrap();
        controller.deliver(b"Hello");

        let mut buffer = [0u8; 10];
        let n = block_on(reader.read_chunk(&mut buffer)).unwrap();
        assert_eq!(&buffer[..n], b"Hello");
    }

    #[test]
    fn test_chunk_larger_than_buffer_is_split() {
        let (link, controller) = MockLink::new("MOCK0");
        let (mut reader, _writer) = link.split().unwrap();
        controller.deliver(b"Hello, World!");

        let mut buffer = [0u8; 5];
        let first = block_on(reader.read_chunk(&mut buffer)).unwrap();
        assert_eq!(&buffer[..first], b"Hello");
        let second = block_on(reader.read_chunk(&mut buffer)).unwrap();
        assert_eq!(&buffer[..second], b", Wor");
    }

    #[test]
    fn test_write_logging_and_limit() {
        let (link, controller) = MockLink::new("MOCK0");
        let (_reader, mut writer) = link.split().unwrap();

        assert_eq!(writer.write_bytes(b"Test1").unwrap(), 5);
        controller.set_write_limit(Some(2));
        assert_eq!(writer.write_bytes(b"Test2").unwrap(), 2);

        assert_eq!(controller.write_log(), vec![b"Test1".to_vec(), b"Te".to_vec()]);
    }

    #[test]
    fn test_fail_next_write() {
        let (link, controller) = MockLink::new("MOCK0");
        let (_reader, mut writer) = link.split().unwrap();
        controller.fail_next_write();

        assert!(writer.write_bytes(b"x").is_err());
        assert!(writer.write_bytes(b"x").is_ok());
    }

    #[test]
    fn test_failing_setting_is_recorded() {
        let (mut link, controller) = MockLink::new("MOCK0");
        controller.fail_setting(Setting::Parity);

        assert!(link.set_parity(Parity::Odd).is_err());
        assert!(link.set_stop_bits(StopBits::Two).is_ok());
        assert_eq!(
            controller.applied_settings(),
            vec![
                AppliedSetting::Parity(Parity::Odd),
                AppliedSetting::StopBits(StopBits::Two)
            ]
        );
    }

    #[test]
    fn test_disconnect_and_hang_up() {
        let (link, controller) = MockLink::new("MOCK0");
        let (mut reader, _writer) = link.split().unwrap();
        let mut buffer = [0u8; 4];

        controller.disconnect();
        assert!(matches!(
            block_on(reader.read_chunk(&mut buffer)),
            Err(PortError::Io(_))
        ));

        controller.hang_up();
        assert_eq!(block_on(reader.read_chunk(&mut buffer)).unwrap(), 0);
    }

    #[test]
    fn test_close_counts_once() {
        let (link, controller) = MockLink::new("MOCK0");
        let (_reader, mut writer) = link.split().unwrap();

        assert!(writer.close().is_ok());
        assert!(writer.close().is_err());
        assert!(writer.write_bytes(b"late").is_err());
        assert_eq!(controller.close_count(), 1);
    }
}
