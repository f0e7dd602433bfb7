//! Serial link backed by the operating system's serial driver.
//!
//! Wraps the `serialport` crate. Reads are blocking calls with a short poll
//! timeout executed on tokio's blocking pool, so the read loop can await them
//! without tying up its own thread.

use super::config::{DataBits, FlowControl, Parity, StopBits, DEFAULT_BAUD_RATE};
use super::error::PortError;
use super::link::{LinkReader, LinkWriter, SerialLink};
use async_trait::async_trait;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Timeouts used for the two halves of an OS serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimeouts {
    /// How long a single blocking read waits before polling again. A close
    /// waits for the read in flight, so this also bounds how long closing takes.
    pub read_poll: Duration,
    /// Upper bound for one blocking write.
    pub write: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            read_poll: Duration::from_millis(50),
            write: Duration::from_secs(1),
        }
    }
}

/// An opened OS serial port.
pub struct SerialPortLink {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    timeouts: LinkTimeouts,
}

impl SerialPortLink {
    /// Open a serial port. Settings are applied afterwards, one by one, by the transport.
    ///
    /// # Example
    /// ```no_run
    /// use serial_transport::port::{LinkTimeouts, SerialPortLink};
    ///
    /// let link = SerialPortLink::open("/dev/ttyUSB0", LinkTimeouts::default())?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(port_name: &str, timeouts: LinkTimeouts) -> Result<Self, PortError> {
        let port = serialport::new(port_name, DEFAULT_BAUD_RATE)
            .timeout(timeouts.read_poll)
            .open()
            .map_err(|e| PortError::from_open(port_name, e))?;

        Ok(Self {
            port,
            name: port_name.to_string(),
            timeouts,
        })
    }

    /// Get a reference to the underlying serialport implementation.
    pub fn as_raw(&self) -> &dyn serialport::SerialPort {
        &*self.port
    }
}

impl SerialLink for SerialPortLink {
    type Reader = PortReader;
    type Writer = PortWriter;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        if baud_rate == 0 {
            return Err(PortError::config("baud rate must be positive"));
        }
        self.port.set_baud_rate(baud_rate).map_err(PortError::Serial)
    }

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError> {
        self.port
            .set_flow_control(flow_control.into())
            .map_err(PortError::Serial)
    }

    fn set_parity(&mut self, parity: Parity) -> Result<(), PortError> {
        self.port.set_parity(parity.into()).map_err(PortError::Serial)
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), PortError> {
        let bits = serialport::StopBits::try_from(stop_bits).map_err(|_| {
            PortError::unsupported("1.5 stop bits are not supported by the serial driver")
        })?;
        self.port.set_stop_bits(bits).map_err(PortError::Serial)
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), PortError> {
        self.port
            .set_data_bits(data_bits.into())
            .map_err(PortError::Serial)
    }

    fn split(self) -> Result<(PortReader, PortWriter), PortError> {
        let mut write_port = self.port.try_clone().map_err(PortError::Serial)?;
        write_port
            .set_timeout(self.timeouts.write)
            .map_err(PortError::Serial)?;

        Ok((
            PortReader {
                port: Some(self.port),
                name: self.name.clone(),
            },
            PortWriter {
                port: Some(write_port),
                name: self.name,
            },
        ))
    }
}

impl std::fmt::Debug for SerialPortLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortLink")
            .field("name", &self.name)
            .field("baud_rate", &self.port.baud_rate().ok())
            .finish()
    }
}

/// Receive half of a [`SerialPortLink`].
pub struct PortReader {
    // Taken while a blocking read is in flight on the blocking pool.
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

#[async_trait]
impl LinkReader for PortReader {
    async fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let capacity = buffer.len();
        loop {
            let mut port = self.port.take().ok_or(PortError::NotOpen)?;

            let (port, scratch, result) = tokio::task::spawn_blocking(move || {
                let mut scratch = vec![0u8; capacity];
                let result = port.read(&mut scratch);
                (port, scratch, result)
            })
            .await
            .map_err(|e| PortError::Io(io::Error::other(e)))?;

            self.port = Some(port);

            match result {
                Ok(0) => continue,
                Ok(n) => {
                    buffer[..n].copy_from_slice(&scratch[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    return Err(PortError::disconnected(self.name.as_str()))
                }
                Err(e) => return Err(PortError::Io(e)),
            }
        }
    }
}

/// Send half of a [`SerialPortLink`].
pub struct PortWriter {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl LinkWriter for PortWriter {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let port = self.port.as_mut().ok_or(PortError::NotOpen)?;
        port.write_all(data).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut => PortError::config(format!(
                "write of {} bytes to {} timed out",
                data.len(),
                self.name
            )),
            _ => PortError::Io(e),
        })?;
        port.flush()?;
        Ok(data.len())
    }

    fn close(&mut self) -> Result<(), PortError> {
        self.port.take().map(drop).ok_or(PortError::NotOpen)
    }
}

/// Description of a serial port found on this system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// List the serial ports the operating system knows about.
pub fn available_ports() -> Result<Vec<PortInfo>, PortError> {
    let ports = serialport::available_ports().map_err(PortError::Serial)?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                serialport::SerialPortType::UsbPort(usb) => format!(
                    "USB {:04x}:{:04x}{}",
                    usb.vid,
                    usb.pid,
                    usb.product
                        .map(|product| format!(" {}", product))
                        .unwrap_or_default()
                ),
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::Unknown => "Serial communication port".to_string(),
            };
            PortInfo {
                name: port.port_name,
                description,
            }
        })
        .collect())
}
