//! Logging side channel of the transport.
//!
//! The transport never returns errors from its background work. Everything it
//! has to report goes through a [`TransportLog`] supplied by whoever created it.

use parking_lot::Mutex;
use std::fmt;

/// Receives every message the transport wants to report.
///
/// `is_debug` separates routine traces from messages a user should see
/// (configuration warnings, open failures, unexpected disconnects).
pub trait TransportLog: Send + Sync {
    fn log_message(&self, text: &str, is_debug: bool);
}

/// Forwards transport messages to `tracing`.
#[derive(Debug, Clone)]
pub struct TracingLog {
    port: String,
}

impl TracingLog {
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }
}

impl TransportLog for TracingLog {
    fn log_message(&self, text: &str, is_debug: bool) {
        if is_debug {
            tracing::debug!(port = %self.port, "{}", text);
        } else {
            tracing::warn!(port = %self.port, "{}", text);
        }
    }
}

/// A message captured by [`RecordingLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub text: String,
    pub is_debug: bool,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = if self.is_debug { "debug" } else { "error" };
        write!(f, "[{}] {}", level, self.text)
    }
}

/// Collects messages in memory, optionally forwarding them to another log.
#[derive(Default)]
pub struct RecordingLog {
    entries: Mutex<Vec<LogEntry>>,
    forward: Option<Box<dyn TransportLog>>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and also pass every message on to `inner`.
    pub fn forwarding_to(inner: impl TransportLog + 'static) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            forward: Some(Box::new(inner)),
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Messages logged with `is_debug == false`.
    pub fn errors(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| !entry.is_debug)
            .cloned()
            .collect()
    }

    pub fn debug_entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.is_debug)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl TransportLog for RecordingLog {
    fn log_message(&self, text: &str, is_debug: bool) {
        self.entries.lock().push(LogEntry {
            text: text.to_string(),
            is_debug,
        });
        if let Some(inner) = &self.forward {
            inner.log_message(text, is_debug);
        }
    }
}

impl fmt::Debug for RecordingLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingLog")
            .field("entries", &self.entries.lock().len())
            .field("forwarding", &self.forward.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_recording_log_splits_levels() {
        let log = RecordingLog::new();
        log.log_message("read loop started", true);
        log.log_message("failed to set parity", false);

        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.errors().len(), 1);
        assert_eq!(log.errors()[0].text, "failed to set parity");
        assert_eq!(log.debug_entries()[0].to_string(), "[debug] read loop started");
    }

    #[test]
    fn test_forwarding() {
        struct Shared(Arc<RecordingLog>);
        impl TransportLog for Shared {
            fn log_message(&self, text: &str, is_debug: bool) {
                self.0.log_message(text, is_debug);
            }
        }

        let inner = Arc::new(RecordingLog::new());
        let outer = RecordingLog::forwarding_to(Shared(Arc::clone(&inner)));
        outer.log_message("hello", false);

        assert_eq!(inner.errors().len(), 1);
        assert_eq!(outer.errors().len(), 1);
    }
}
