//! `AsyncSerialTransport` over a pseudo-terminal pair.
//!
//! The transport opens the slave side by name, exactly as it would a real
//! device, while the test drives the master side.

#![cfg(unix)]

mod common;

use common::{wait_until, WAIT};
use serial_transport::port::{
    AsyncSerialTransport, LinkTimeouts, PortConfiguration, RecordingLog, SerialPortLink,
    TransportOptions,
};
use serialport::{SerialPort, TTYPort};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A pty pair with the slave fd closed again, so only its name is kept.
fn pty() -> (TTYPort, String) {
    let (master, slave) = TTYPort::pair().expect("pty pair");
    let name = slave.name().expect("slave pty has a name");
    drop(slave);
    (master, name)
}

fn open(name: &str) -> (AsyncSerialTransport, Arc<RecordingLog>) {
    let log = Arc::new(RecordingLog::new());
    let transport = AsyncSerialTransport::open(
        PortConfiguration::new(name),
        TransportOptions::default(),
        log.clone(),
    );
    (transport, log)
}

#[test]
fn test_pty_bytes_reach_buffer() {
    let (mut master, name) = pty();
    let (transport, log) = open(&name);
    assert!(transport.is_active(), "open failed: {:?}", log.errors());

    master.write_all(b"PING\r").unwrap();
    assert!(wait_until(WAIT, || transport.bytes_available() >= 5));

    let mut out = [0u8; 8];
    assert_eq!(transport.read_available(&mut out), 5);
    assert_eq!(&out[..5], b"PING\r");
    assert!(transport.shutdown());
}

#[test]
fn test_port_reopens_right_after_shutdown() {
    let (_master, name) = pty();
    let (transport, log) = open(&name);
    assert!(transport.is_active(), "open failed: {:?}", log.errors());

    // Let the read loop park a blocking read before closing.
    thread::sleep(Duration::from_millis(20));
    assert!(transport.shutdown());
    assert!(!transport.is_active());

    let reopened = SerialPortLink::open(&name, LinkTimeouts::default());
    assert!(reopened.is_ok(), "reopen failed: {:?}", reopened.err());
}

#[test]
fn test_port_reopens_right_after_drop() {
    let (_master, name) = pty();
    let (transport, _log) = open(&name);
    thread::sleep(Duration::from_millis(20));
    drop(transport);

    let (again, log) = open(&name);
    assert!(again.is_active(), "reopen failed: {:?}", log.errors());
    assert!(again.shutdown());
}

#[test]
fn test_second_open_reports_busy_port() {
    let (_master, name) = pty();
    let (transport, _log) = open(&name);
    assert!(transport.is_active());

    let (second, log) = open(&name);
    assert!(!second.is_active());
    let errors = log.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].text.contains("busy"), "{}", errors[0].text);

    assert!(transport.shutdown());
}
