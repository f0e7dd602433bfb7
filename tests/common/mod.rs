//! Shared test utilities for serial-transport tests.
//!
//! This module provides common test infrastructure including:
//! - Transports over simulated links with a recording log
//! - A port opener that hands out simulated links to devices and registries
//! - A link whose read loop can be wedged, for shutdown timeout tests
//! - Polling helpers for state changed by the background read loop

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use serial_transport::device::PortOpener;
use serial_transport::port::{
    AsyncSerialTransport, DataBits, FlowControl, LinkReader, LinkWriter, MockLink,
    MockLinkController, Parity, PortConfiguration, PortError, RecordingLog, SerialLink,
    StopBits, TransportLog, TransportOptions,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default time to wait for the read loop to catch up.
pub const WAIT: Duration = Duration::from_secs(2);

/// Poll `condition` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

/// A transport over a fresh simulated link.
pub struct MockTransport {
    pub transport: Arc<AsyncSerialTransport>,
    pub controller: MockLinkController,
    pub log: Arc<RecordingLog>,
}

impl MockTransport {
    pub fn open(config: PortConfiguration) -> Self {
        Self::open_with(config, TransportOptions::default(), |_| {})
    }

    /// `prepare` runs before the transport takes the link, e.g. to inject setting failures.
    pub fn open_with(
        config: PortConfiguration,
        options: TransportOptions,
        prepare: impl FnOnce(&MockLinkController),
    ) -> Self {
        let (link, controller) = MockLink::new(config.device.clone());
        prepare(&controller);

        let log = Arc::new(RecordingLog::new());
        let transport = AsyncSerialTransport::with_link(Ok(link), config, options, log.clone());
        Self {
            transport: Arc::new(transport),
            controller,
            log,
        }
    }

    /// Pop everything currently buffered.
    pub fn drain(&self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(byte) = self.transport.read_one_character() {
            out.push(byte);
        }
        out
    }

    pub fn wait_for_bytes(&self, count: usize) -> bool {
        wait_until(WAIT, || self.transport.bytes_available() >= count)
    }
}

/// Opens simulated links and keeps their controllers by port name.
#[derive(Default)]
pub struct MockOpener {
    controllers: Mutex<HashMap<String, MockLinkController>>,
    failing: Mutex<Vec<String>>,
    options: Mutex<Option<TransportOptions>>,
}

impl MockOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make opening `port` fail as if the device did not exist.
    pub fn fail_port(&self, port: &str) {
        self.failing.lock().push(port.to_string());
    }

    /// Override the transport options devices ask for.
    pub fn force_options(&self, options: TransportOptions) {
        *self.options.lock() = Some(options);
    }

    pub fn controller(&self, port: &str) -> MockLinkController {
        self.controllers
            .lock()
            .get(port)
            .cloned()
            .unwrap_or_else(|| panic!("{} was never opened", port))
    }

    pub fn opened(&self, port: &str) -> bool {
        self.controllers.lock().contains_key(port)
    }
}

impl PortOpener for MockOpener {
    fn open(
        &self,
        config: PortConfiguration,
        options: TransportOptions,
        log: Arc<dyn TransportLog>,
    ) -> AsyncSerialTransport {
        let options = self.options.lock().clone().unwrap_or(options);
        if self.failing.lock().contains(&config.device) {
            let error = PortError::not_found(config.device.clone());
            return AsyncSerialTransport::with_link::<MockLink>(Err(error), config, options, log);
        }

        let (link, controller) = MockLink::new(config.device.clone());
        self.controllers
            .lock()
            .insert(config.device.clone(), controller);
        AsyncSerialTransport::with_link(Ok(link), config, options, log)
    }
}

/// Gate shared between a [`StuckLink`] and the test.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    signal: Condvar,
}

impl Gate {
    pub fn release(&self) {
        *self.open.lock() = true;
        self.signal.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.signal.wait(&mut open);
        }
    }
}

/// A link whose first read blocks the I/O thread until the gate is released,
/// so close requests cannot be processed in the meantime.
pub struct StuckLink {
    name: String,
    gate: Arc<Gate>,
}

impl StuckLink {
    pub fn new(name: &str) -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate::default());
        (
            Self {
                name: name.to_string(),
                gate: Arc::clone(&gate),
            },
            gate,
        )
    }
}

pub struct StuckReader {
    gate: Arc<Gate>,
}

pub struct NullWriter;

impl SerialLink for StuckLink {
    type Reader = StuckReader;
    type Writer = NullWriter;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_baud_rate(&mut self, _: u32) -> Result<(), PortError> {
        Ok(())
    }

    fn set_flow_control(&mut self, _: FlowControl) -> Result<(), PortError> {
        Ok(())
    }

    fn set_parity(&mut self, _: Parity) -> Result<(), PortError> {
        Ok(())
    }

    fn set_stop_bits(&mut self, _: StopBits) -> Result<(), PortError> {
        Ok(())
    }

    fn set_data_bits(&mut self, _: DataBits) -> Result<(), PortError> {
        Ok(())
    }

    fn split(self) -> Result<(StuckReader, NullWriter), PortError> {
        Ok((StuckReader { gate: self.gate }, NullWriter))
    }
}

#[async_trait]
impl LinkReader for StuckReader {
    async fn read_chunk(&mut self, _buffer: &mut [u8]) -> Result<usize, PortError> {
        // Blocks the runtime thread on purpose.
        self.gate.wait();
        Err(PortError::NotOpen)
    }
}

impl LinkWriter for NullWriter {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        Ok(data.len())
    }
}

/// Opens [`StuckLink`]s and keeps their gates.
#[derive(Default)]
pub struct StuckOpener {
    gates: Mutex<Vec<Arc<Gate>>>,
}

impl StuckOpener {
    pub fn release_all(&self) {
        for gate in self.gates.lock().iter() {
            gate.release();
        }
    }
}

impl PortOpener for StuckOpener {
    fn open(
        &self,
        config: PortConfiguration,
        _options: TransportOptions,
        log: Arc<dyn TransportLog>,
    ) -> AsyncSerialTransport {
        let (link, gate) = StuckLink::new(&config.device);
        self.gates.lock().push(gate);
        let options = TransportOptions {
            close_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        AsyncSerialTransport::with_link(Ok(link), config, options, log)
    }
}
