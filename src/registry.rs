//! Process-wide bookkeeping of serial ports.
//!
//! Several drivers may talk to the same physical port. [`PortRegistry`] hands
//! out one shared [`SerialDevice`] per port name and shuts it down when the
//! last user releases it. Ports whose shutdown hung land on the
//! [`Blacklist`] and are neither reopened nor listed again.

use crate::config::{Config, RegistryConfig};
use crate::device::{DeviceError, DeviceSettings, PortOpener, SerialDevice, SystemPortOpener};
use crate::port::{available_ports, PortError, PortInfo, TracingLog, TransportLog};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Names of ports that must not be opened again.
#[derive(Debug, Default)]
pub struct Blacklist {
    ports: Mutex<BTreeSet<String>>,
}

impl Blacklist {
    pub fn contains(&self, port: &str) -> bool {
        self.ports.lock().contains(port)
    }

    pub fn insert(&self, port: &str) {
        if self.ports.lock().insert(port.to_string()) {
            tracing::warn!(port, "Port blacklisted after failing to close cleanly");
        }
    }

    pub fn ports(&self) -> Vec<String> {
        self.ports.lock().iter().cloned().collect()
    }
}

struct Entry {
    device: Arc<SerialDevice>,
    references: usize,
}

/// Shared, reference-counted serial devices keyed by port name.
pub struct PortRegistry {
    config: Config,
    opener: Arc<dyn PortOpener>,
    blacklist: Arc<Blacklist>,
    shared_log: Option<Arc<dyn TransportLog>>,
    devices: Mutex<HashMap<String, Entry>>,
}

impl PortRegistry {
    /// Registry opening real OS ports.
    pub fn new(config: Config) -> Self {
        Self::with_opener(config, Arc::new(SystemPortOpener))
    }

    pub fn with_opener(config: Config, opener: Arc<dyn PortOpener>) -> Self {
        Self {
            config,
            opener,
            blacklist: Arc::new(Blacklist::default()),
            shared_log: None,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Send every device's messages to `log` instead of a per-port tracing log.
    pub fn with_log(mut self, log: Arc<dyn TransportLog>) -> Self {
        self.shared_log = Some(log);
        self
    }

    /// Get the device for `port`, creating it on first use.
    ///
    /// The device is not initialized here; callers do that themselves.
    pub fn acquire(&self, port: &str) -> Arc<SerialDevice> {
        let name = self.config.serial.resolve_port(port);
        let mut devices = self.devices.lock();

        if let Some(entry) = devices.get_mut(&name) {
            entry.references += 1;
            return Arc::clone(&entry.device);
        }

        let log = self
            .shared_log
            .clone()
            .unwrap_or_else(|| Arc::new(TracingLog::new(name.clone())));
        let device = Arc::new(SerialDevice::new(
            DeviceSettings::from_config(&self.config, &name),
            Arc::clone(&self.opener),
            Arc::clone(&self.blacklist),
            log,
        ));
        tracing::debug!(port = %name, "Created serial device");

        devices.insert(
            name,
            Entry {
                device: Arc::clone(&device),
                references: 1,
            },
        );
        device
    }

    /// Give back a device obtained from [`acquire`](Self::acquire).
    ///
    /// The last release shuts the device down. A shutdown that times out
    /// blacklists the port and is reported as an error.
    pub fn release(&self, device: &Arc<SerialDevice>) -> Result<(), DeviceError> {
        let removed = {
            let mut devices = self.devices.lock();
            let Some(entry) = devices.get_mut(device.name()) else {
                return Ok(());
            };
            if !Arc::ptr_eq(&entry.device, device) {
                return Ok(());
            }

            entry.references -= 1;
            if entry.references > 0 {
                return Ok(());
            }
            devices.remove(device.name())
        };

        // Shut down outside the registry lock; it can take up to the close timeout.
        match removed {
            Some(entry) => entry.device.shutdown(),
            None => Ok(()),
        }
    }

    pub fn reference_count(&self, port: &str) -> usize {
        let name = self.config.serial.resolve_port(port);
        self.devices
            .lock()
            .get(&name)
            .map_or(0, |entry| entry.references)
    }

    pub fn is_blacklisted(&self, port: &str) -> bool {
        self.blacklist.contains(&self.config.serial.resolve_port(port))
    }

    /// Refuse future opens of `port`. Aliases are resolved first.
    pub fn blacklist(&self, port: &str) {
        self.blacklist.insert(&self.config.serial.resolve_port(port));
    }

    pub fn blacklist_handle(&self) -> Arc<Blacklist> {
        Arc::clone(&self.blacklist)
    }

    /// A lister that hides this registry's blacklisted ports.
    pub fn port_lister(&self) -> PortLister {
        PortLister::new(&self.config.registry, Arc::clone(&self.blacklist))
    }
}

impl std::fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let devices = self.devices.lock();
        f.debug_struct("PortRegistry")
            .field("devices", &devices.keys().collect::<Vec<_>>())
            .field("blacklist", &self.blacklist.ports())
            .finish()
    }
}

type PortSource = Box<dyn Fn() -> Result<Vec<PortInfo>, PortError> + Send + Sync>;

struct CachedPorts {
    fetched_at: Instant,
    ports: Vec<PortInfo>,
}

/// Cached view of the serial ports present on this machine.
///
/// The OS is only queried when the cache is empty or older than the TTL.
pub struct PortLister {
    ttl: Duration,
    name_filter: Vec<String>,
    blacklist: Arc<Blacklist>,
    source: PortSource,
    cache: Mutex<Option<CachedPorts>>,
}

impl PortLister {
    pub fn new(config: &RegistryConfig, blacklist: Arc<Blacklist>) -> Self {
        Self::with_source(config, blacklist, available_ports)
    }

    /// Use `source` instead of asking the OS.
    pub fn with_source<F>(config: &RegistryConfig, blacklist: Arc<Blacklist>, source: F) -> Self
    where
        F: Fn() -> Result<Vec<PortInfo>, PortError> + Send + Sync + 'static,
    {
        Self {
            ttl: config.port_list_ttl(),
            name_filter: config.port_name_filter.clone(),
            blacklist,
            source: Box::new(source),
            cache: Mutex::new(None),
        }
    }

    /// Ports available for opening, refreshed if the cached list is stale.
    pub fn list(&self) -> Result<Vec<PortInfo>, PortError> {
        let mut cache = self.cache.lock();
        let stale = match cache.as_ref() {
            Some(cached) => cached.ports.is_empty() || cached.fetched_at.elapsed() > self.ttl,
            None => true,
        };

        if stale {
            let ports = (self.source)()?
                .into_iter()
                .filter(|port| self.matches_filter(&port.name))
                .collect::<Vec<_>>();
            tracing::debug!(count = ports.len(), "Refreshed serial port list");
            *cache = Some(CachedPorts {
                fetched_at: Instant::now(),
                ports,
            });
        }

        let ports = cache.as_ref().map(|c| c.ports.clone()).unwrap_or_default();
        Ok(ports
            .into_iter()
            .filter(|port| !self.blacklist.contains(&port.name))
            .collect())
    }

    /// Drop the cached list so the next [`list`](Self::list) asks the OS again.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    fn matches_filter(&self, name: &str) -> bool {
        self.name_filter.is_empty()
            || self
                .name_filter
                .iter()
                .any(|pattern| name.contains(pattern.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info(name: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            description: "test".to_string(),
        }
    }

    #[test]
    fn test_lister_caches_within_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lister = PortLister::with_source(
            &RegistryConfig::default(),
            Arc::new(Blacklist::default()),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![info("/dev/ttyUSB0")])
            },
        );

        assert_eq!(lister.list().unwrap().len(), 1);
        assert_eq!(lister.list().unwrap().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        lister.invalidate();
        lister.list().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lister_retries_empty_list() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lister = PortLister::with_source(
            &RegistryConfig::default(),
            Arc::new(Blacklist::default()),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            },
        );

        lister.list().unwrap();
        lister.list().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lister_filters_names_and_blacklist() {
        let config = RegistryConfig {
            port_name_filter: vec!["ttyUSB".to_string(), "ttyACM".to_string()],
            ..Default::default()
        };
        let blacklist = Arc::new(Blacklist::default());
        blacklist.insert("/dev/ttyUSB1");

        let lister = PortLister::with_source(&config, Arc::clone(&blacklist), || {
            Ok(vec![
                info("/dev/ttyS0"),
                info("/dev/ttyUSB0"),
                info("/dev/ttyUSB1"),
                info("/dev/ttyACM0"),
            ])
        });

        let names: Vec<String> = lister.list().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["/dev/ttyUSB0", "/dev/ttyACM0"]);
    }
}
