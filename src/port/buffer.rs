//! Inbound byte queue shared between the read loop and client threads.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// FIFO of received bytes not yet consumed by a client.
///
/// Only the read loop appends and only clients pop or clear. Every operation
/// takes the same lock, so they are linearizable with respect to each other.
/// A [`clear`](InboundBuffer::clear) racing an in-flight
/// [`append`](InboundBuffer::append) is best-effort: it removes exactly the
/// bytes present when it acquires the lock, nothing that lands afterwards.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    bytes: Mutex<VecDeque<u8>>,
}

impl InboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a received chunk at the tail.
    pub fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.bytes.lock().extend(chunk);
    }

    /// Remove and return the head byte, or `None` when nothing is buffered.
    pub fn pop_one(&self) -> Option<u8> {
        self.bytes.lock().pop_front()
    }

    /// Pop as many bytes as fit into `out` under a single lock acquisition.
    pub fn drain_into(&self, out: &mut [u8]) -> usize {
        let mut bytes = self.bytes.lock();
        let count = out.len().min(bytes.len());
        for (slot, byte) in out.iter_mut().zip(bytes.drain(..count)) {
            *slot = byte;
        }
        count
    }

    /// Discard everything currently buffered.
    pub fn clear(&self) {
        self.bytes.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }
}
