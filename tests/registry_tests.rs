//! Reference counting, aliasing and blacklisting in `PortRegistry`.

mod common;

use common::{MockOpener, StuckOpener};
use serial_transport::config::Config;
use serial_transport::device::DeviceError;
use serial_transport::port::RecordingLog;
use serial_transport::registry::PortRegistry;
use std::sync::Arc;

fn registry() -> (PortRegistry, Arc<MockOpener>) {
    let opener = MockOpener::new();
    let registry = PortRegistry::with_opener(Config::default(), opener.clone())
        .with_log(Arc::new(RecordingLog::new()));
    (registry, opener)
}

#[test]
fn test_acquire_shares_one_device() {
    let (registry, _) = registry();

    let first = registry.acquire("/dev/mock0");
    let second = registry.acquire("/dev/mock0");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.reference_count("/dev/mock0"), 2);
    assert_eq!(registry.reference_count("/dev/mock1"), 0);
}

#[test]
fn test_last_release_shuts_device_down() {
    let (registry, opener) = registry();

    let first = registry.acquire("/dev/mock0");
    let second = registry.acquire("/dev/mock0");
    first.initialize().unwrap();

    registry.release(&first).unwrap();
    assert_eq!(registry.reference_count("/dev/mock0"), 1);
    assert!(second.is_initialized());

    registry.release(&second).unwrap();
    assert_eq!(registry.reference_count("/dev/mock0"), 0);
    assert!(!second.is_initialized());
    assert_eq!(opener.controller("/dev/mock0").close_count(), 1);
}

#[test]
fn test_release_of_unknown_device_is_ignored() {
    let (other, _) = registry();
    let (registry, _) = registry();

    let foreign = other.acquire("/dev/mock0");
    let local = registry.acquire("/dev/mock0");

    registry.release(&foreign).unwrap();
    assert_eq!(registry.reference_count("/dev/mock0"), 1);
    registry.release(&local).unwrap();
}

#[test]
fn test_aliases_resolve_to_one_device() {
    let mut config = Config::default();
    config
        .serial
        .port_aliases
        .insert("stage".to_string(), "/dev/mock-stage".to_string());
    let registry = PortRegistry::with_opener(config, MockOpener::new());

    let by_alias = registry.acquire("stage");
    let by_name = registry.acquire("/dev/mock-stage");

    assert_eq!(by_alias.name(), "/dev/mock-stage");
    assert!(Arc::ptr_eq(&by_alias, &by_name));
    assert_eq!(registry.reference_count("stage"), 2);
}

#[test]
fn test_devices_use_configured_settings() {
    let mut config = Config::default();
    config.serial.baud_rate = 57600;
    config.device.answer_timeout_ms = 1234;
    let registry = PortRegistry::with_opener(config, MockOpener::new());

    let settings = registry.acquire("/dev/mock0").settings();
    assert_eq!(settings.port.baud_rate, 57600);
    assert_eq!(settings.answer_timeout.as_millis(), 1234);
}

#[test]
fn test_manual_blacklist_blocks_initialize() {
    let (registry, opener) = registry();
    registry.blacklist("/dev/mock0");

    let device = registry.acquire("/dev/mock0");
    assert_eq!(
        device.initialize(),
        Err(DeviceError::Blacklisted("/dev/mock0".to_string()))
    );
    assert!(!opener.opened("/dev/mock0"));
}

#[test]
fn test_hung_shutdown_blacklists_port() {
    let opener = Arc::new(StuckOpener::default());
    let log = Arc::new(RecordingLog::new());
    let registry =
        PortRegistry::with_opener(Config::default(), opener.clone()).with_log(log.clone());

    let device = registry.acquire("/dev/stuck0");
    device.initialize().unwrap();

    assert_eq!(
        registry.release(&device),
        Err(DeviceError::ShutdownTimedOut("/dev/stuck0".to_string()))
    );
    assert!(registry.is_blacklisted("/dev/stuck0"));
    assert!(log
        .errors()
        .iter()
        .any(|entry| entry.text.contains("Failed to cleanly close")));

    let again = registry.acquire("/dev/stuck0");
    assert_eq!(
        again.initialize(),
        Err(DeviceError::Blacklisted("/dev/stuck0".to_string()))
    );

    opener.release_all();
}

#[test]
fn test_blacklist_by_alias_blocks_initialize() {
    let mut config = Config::default();
    config
        .serial
        .port_aliases
        .insert("scope".to_string(), "/dev/mock0".to_string());
    let opener = MockOpener::new();
    let registry = PortRegistry::with_opener(config, opener.clone());

    registry.blacklist("scope");
    assert!(registry.is_blacklisted("/dev/mock0"));
    assert!(registry.is_blacklisted("scope"));

    for name in ["scope", "/dev/mock0"] {
        assert_eq!(
            registry.acquire(name).initialize(),
            Err(DeviceError::Blacklisted("/dev/mock0".to_string()))
        );
    }
    assert!(!opener.opened("/dev/mock0"));
}
