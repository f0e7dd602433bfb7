//! Asynchronous serial transport.
//!
//! An [`AsyncSerialTransport`] owns one opened serial handle. On construction
//! it applies the port settings, splits the handle and starts a read loop on
//! a dedicated I/O context: its own thread running a single-threaded tokio
//! runtime. The receive half lives on that context and nowhere else. Client
//! threads write through the send half, pop received bytes from the
//! [`InboundBuffer`] and post close requests to the context.
//!
//! ```text
//!  client threads                         I/O context (one thread)
//!  ──────────────                         ────────────────────────
//!  write_characters ──> [handle lock] ──> writer half
//!  read_one_character <── [buffer lock] <── read loop <── reader half
//!  close ──────────────> [posting lock] ──> close request ─┘
//! ```
//!
//! Nothing crosses back to the caller as an error. Failures become messages
//! on the [`TransportLog`] plus the transition to inactive.

use super::buffer::InboundBuffer;
use super::config::PortConfiguration;
use super::error::PortError;
use super::link::{LinkReader, LinkWriter, SerialLink, Setting};
use super::log::TransportLog;
use super::serial_link::{LinkTimeouts, SerialPortLink};
use parking_lot::{Condvar, Mutex};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default upper bound on bytes taken from the device per read.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Tuning knobs for a transport. Fixed for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Maximum number of bytes requested by one read.
    pub chunk_size: usize,
    /// Pause after each received chunk, bounding CPU use during small bursts.
    pub read_yield: Duration,
    /// How long `shutdown` and drop wait for the I/O context to stop.
    pub close_timeout: Duration,
    /// Timeouts for the OS link opened by [`AsyncSerialTransport::open`].
    pub link_timeouts: LinkTimeouts,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_yield: Duration::from_millis(1),
            close_timeout: Duration::from_secs(1),
            link_timeouts: LinkTimeouts::default(),
        }
    }
}

/// Requests posted from client threads to the I/O context.
#[derive(Debug)]
enum ContextRequest {
    Close,
}

/// How a single read request completed.
#[derive(Debug)]
pub(crate) enum ReadOutcome<'a> {
    Received(&'a [u8]),
    /// A close request won the race against the read.
    Cancelled,
    Failed(PortError),
}

/// Continuation for the read loop. `Continue` re-issues the read, `Break` ends the loop.
pub(crate) trait ReadCompletion {
    fn on_read_complete(&self, outcome: ReadOutcome<'_>) -> ControlFlow<()>;
}

/// State shared between the transport and its I/O context.
struct TransportCore {
    name: String,
    buffer: InboundBuffer,
    /// Handle lock. `None` once the handle has been released.
    writer: Mutex<Option<Box<dyn LinkWriter>>>,
    active: AtomicBool,
    shutdown_in_progress: AtomicBool,
    close_requested: AtomicBool,
    /// Set when the I/O context has stopped (or never started).
    finished: Mutex<bool>,
    finished_signal: Condvar,
    log: Arc<dyn TransportLog>,
}

impl TransportCore {
    fn new(name: String, log: Arc<dyn TransportLog>) -> Self {
        Self {
            name,
            buffer: InboundBuffer::new(),
            writer: Mutex::new(None),
            active: AtomicBool::new(false),
            shutdown_in_progress: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
            finished: Mutex::new(false),
            finished_signal: Condvar::new(),
            log,
        }
    }

    fn log(&self, text: &str, is_debug: bool) {
        self.log.log_message(text, is_debug);
    }

    /// Close the handle and go inactive. Only the first call does anything.
    fn release_handle(&self) {
        let writer = self.writer.lock().take();
        self.active.store(false, Ordering::SeqCst);

        if let Some(mut writer) = writer {
            match writer.close() {
                Ok(()) => self.log(&format!("Closed serial port {}", self.name), true),
                Err(e) => self.log(
                    &format!("Error while closing serial port {}: {}", self.name, e),
                    true,
                ),
            }
        }
    }

    fn mark_finished(&self) {
        let mut finished = self.finished.lock();
        *finished = true;
        self.finished_signal.notify_all();
    }
}

impl ReadCompletion for TransportCore {
    fn on_read_complete(&self, outcome: ReadOutcome<'_>) -> ControlFlow<()> {
        match outcome {
            ReadOutcome::Received(chunk) => {
                tracing::trace!(port = %self.name, bytes = chunk.len(), "chunk received");
                self.buffer.append(chunk);
                ControlFlow::Continue(())
            }
            ReadOutcome::Cancelled => {
                self.log(&format!("Read loop on {} stopped by close request", self.name), true);
                self.release_handle();
                ControlFlow::Break(())
            }
            ReadOutcome::Failed(err) => {
                if self.close_requested.load(Ordering::SeqCst) {
                    // The failure is the close we asked for.
                    self.log(
                        &format!("Read on {} aborted by close: {}", self.name, err),
                        true,
                    );
                } else if self.shutdown_in_progress.load(Ordering::SeqCst) {
                    self.log(
                        &format!("Read on {} ended during shutdown: {}", self.name, err),
                        true,
                    );
                } else {
                    self.log(
                        &format!(
                            "Serial port {} read failed, closing the port: {}",
                            self.name, err
                        ),
                        false,
                    );
                }
                self.release_handle();
                ControlFlow::Break(())
            }
        }
    }
}

/// Duplex serial client with a background read loop.
///
/// Construction never fails: a port that could not be opened yields an
/// inactive transport whose operations are no-ops. Once inactive a transport
/// stays inactive; create a new one to reconnect.
pub struct AsyncSerialTransport {
    core: Arc<TransportCore>,
    config: PortConfiguration,
    options: TransportOptions,
    /// Posting lock. Holds the request channel until the first close.
    requests: Mutex<Option<mpsc::UnboundedSender<ContextRequest>>>,
    context: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AsyncSerialTransport {
    /// Open the OS serial device named in `config` and start the read loop.
    pub fn open(
        config: PortConfiguration,
        options: TransportOptions,
        log: Arc<dyn TransportLog>,
    ) -> Self {
        let link = SerialPortLink::open(&config.device, options.link_timeouts);
        Self::with_link(link, config, options, log)
    }

    /// Take over an already opened link (or the error from trying to open one).
    pub fn with_link<L: SerialLink>(
        link: Result<L, PortError>,
        config: PortConfiguration,
        options: TransportOptions,
        log: Arc<dyn TransportLog>,
    ) -> Self {
        let core = Arc::new(TransportCore::new(config.device.clone(), log));
        let transport = Self {
            core,
            config,
            options,
            requests: Mutex::new(None),
            context: Mutex::new(None),
        };

        match link {
            Ok(link) => transport.start(link),
            Err(e) => {
                transport.core.log(
                    &format!("Failed to open serial port {}: {}", transport.core.name, e),
                    false,
                );
                transport.core.mark_finished();
            }
        }
        transport
    }

    fn start<L: SerialLink>(&self, mut link: L) {
        self.apply_settings(&mut link);

        let (reader, writer) = match link.split() {
            Ok(halves) => halves,
            Err(e) => {
                self.core.log(
                    &format!("Failed to open serial port {}: {}", self.core.name, e),
                    false,
                );
                self.core.mark_finished();
                return;
            }
        };

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                let mut writer = writer;
                let _ = writer.close();
                self.core.log(
                    &format!("Failed to create I/O context for {}: {}", self.core.name, e),
                    false,
                );
                self.core.mark_finished();
                return;
            }
        };

        *self.core.writer.lock() = Some(Box::new(writer));
        self.core.active.store(true, Ordering::SeqCst);

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let core = Arc::clone(&self.core);
        let options = self.options.clone();
        let drain_timeout = options.close_timeout;

        let spawned = thread::Builder::new()
            .name(format!("serial-io {}", self.core.name))
            .spawn(move || {
                tracing::debug!(port = %core.name, "read loop started");
                runtime.block_on(read_loop(
                    reader,
                    request_rx,
                    Arc::clone(&core),
                    &core.name,
                    options,
                ));
                // A cancelled read may still own the receive handle on the
                // blocking pool. The port is only closed once that read returns.
                runtime.shutdown_timeout(drain_timeout);
                core.mark_finished();
            });

        match spawned {
            Ok(handle) => {
                *self.requests.lock() = Some(request_tx);
                *self.context.lock() = Some(handle);
                self.core.log(
                    &format!("Opened serial port {} ({})", self.core.name, self.config),
                    true,
                );
            }
            Err(e) => {
                self.core.log(
                    &format!("Failed to start read loop for {}: {}", self.core.name, e),
                    false,
                );
                self.core.release_handle();
                self.core.mark_finished();
            }
        }
    }

    /// Apply every setting in a fixed order. A failure is logged and the rest
    /// are still attempted.
    fn apply_settings<L: SerialLink>(&self, link: &mut L) {
        for setting in Setting::APPLY_ORDER {
            let result = match setting {
                Setting::BaudRate => link.set_baud_rate(self.config.baud_rate),
                Setting::FlowControl => link.set_flow_control(self.config.flow_control),
                Setting::Parity => link.set_parity(self.config.parity),
                Setting::StopBits => link.set_stop_bits(self.config.stop_bits),
                Setting::CharacterSize => link.set_data_bits(self.config.data_bits()),
            };
            if let Err(e) = result {
                self.core.log(
                    &format!(
                        "Failed to set {} on serial port {}: {}",
                        setting.label(),
                        self.core.name,
                        e
                    ),
                    false,
                );
            }
        }
    }

    /// Blocking write of the whole slice.
    ///
    /// Returns true only if the device accepted exactly `data.len()` bytes.
    pub fn write_characters(&self, data: &[u8]) -> bool {
        let mut guard = self.core.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return false;
        };
        if data.is_empty() {
            return true;
        }

        match writer.write_bytes(data) {
            Ok(written) if written == data.len() => true,
            Ok(written) => {
                self.core.log(
                    &format!(
                        "Short write on serial port {}: {} of {} bytes accepted",
                        self.core.name,
                        written,
                        data.len()
                    ),
                    false,
                );
                false
            }
            Err(e) => {
                self.core.log(
                    &format!("Write to serial port {} failed: {}", self.core.name, e),
                    false,
                );
                false
            }
        }
    }

    pub fn write_one_character(&self, byte: u8) -> bool {
        self.write_characters(&[byte])
    }

    /// Pop the oldest received byte. `None` means nothing has arrived yet.
    pub fn read_one_character(&self) -> Option<u8> {
        self.core.buffer.pop_one()
    }

    /// Pop as many received bytes as fit into `out`.
    pub fn read_available(&self, out: &mut [u8]) -> usize {
        self.core.buffer.drain_into(out)
    }

    /// Discard received bytes nobody has read yet.
    ///
    /// Best-effort: a chunk being appended concurrently may land after the purge.
    pub fn purge(&self) {
        self.core.buffer.clear();
    }

    /// Ask the I/O context to stop the read loop and release the port.
    ///
    /// Returns immediately. Safe to call any number of times from any thread.
    pub fn close(&self) {
        let sender = self.requests.lock().take();
        if let Some(sender) = sender {
            self.core.close_requested.store(true, Ordering::SeqCst);
            // The loop may already have ended on its own.
            let _ = sender.send(ContextRequest::Close);
        }
    }

    /// Flag an intentional teardown so read failures it causes are not reported.
    pub fn mark_shutdown_in_progress(&self, in_progress: bool) {
        self.core
            .shutdown_in_progress
            .store(in_progress, Ordering::SeqCst);
    }

    /// Wait until the I/O context has stopped. Returns false on timeout.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let finished = {
            let mut finished = self.core.finished.lock();
            if !*finished {
                self.core
                    .finished_signal
                    .wait_while_for(&mut finished, |done| !*done, timeout);
            }
            *finished
        };

        if finished {
            if let Some(handle) = self.context.lock().take() {
                let _ = handle.join();
            }
        }
        finished
    }

    /// Intentional teardown: mark shutdown, close, wait up to the close timeout.
    ///
    /// Returns false if the I/O context did not stop in time; its thread is then left detached.
    pub fn shutdown(&self) -> bool {
        self.mark_shutdown_in_progress(true);
        self.close();
        let stopped = self.wait_closed(self.options.close_timeout);
        if !stopped {
            self.core.log(
                &format!(
                    "Failed to cleanly close serial port {} (read loop still running after {:?})",
                    self.core.name, self.options.close_timeout
                ),
                false,
            );
        }
        stopped
    }

    pub fn is_active(&self) -> bool {
        self.core.active.load(Ordering::SeqCst)
    }

    pub fn is_shutdown_in_progress(&self) -> bool {
        self.core.shutdown_in_progress.load(Ordering::SeqCst)
    }

    /// Number of received bytes waiting to be read.
    pub fn bytes_available(&self) -> usize {
        self.core.buffer.len()
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn config(&self) -> &PortConfiguration {
        &self.config
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }
}

impl Drop for AsyncSerialTransport {
    fn drop(&mut self) {
        self.close();
        if !self.wait_closed(self.options.close_timeout) {
            tracing::warn!(port = %self.core.name, "I/O context did not stop; detaching it");
        }
    }
}

impl std::fmt::Debug for AsyncSerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSerialTransport")
            .field("name", &self.core.name)
            .field("config", &self.config)
            .field("active", &self.is_active())
            .field("buffered", &self.bytes_available())
            .finish()
    }
}

async fn read_loop<R, H>(
    mut reader: R,
    mut requests: mpsc::UnboundedReceiver<ContextRequest>,
    handler: Arc<H>,
    port_name: &str,
    options: TransportOptions,
) where
    R: LinkReader,
    H: ReadCompletion,
{
    let mut chunk = vec![0u8; options.chunk_size.max(1)];

    loop {
        // Close requests win ties so a closing transport never starts another read.
        let completion = tokio::select! {
            biased;
            _ = requests.recv() => None,
            result = reader.read_chunk(&mut chunk) => Some(result),
        };

        let outcome = match completion {
            None => ReadOutcome::Cancelled,
            Some(Ok(0)) => ReadOutcome::Failed(PortError::disconnected(port_name)),
            Some(Ok(n)) => ReadOutcome::Received(&chunk[..n]),
            Some(Err(e)) => ReadOutcome::Failed(e),
        };

        if handler.on_read_complete(outcome).is_break() {
            break;
        }

        if options.read_yield.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(options.read_yield).await;
        }
    }
}
