//! Handshake tracking for dispatched telegrams

use agv_shared::HandshakeEntry;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

/// Records dispatched telegrams for handshake/audit purposes
pub trait HandshakeTracker: Send + Sync {
    fn append(&self, entry: HandshakeEntry);
}

/// In-memory FIFO of handshake entries awaiting correlation.
///
/// Holds at most `capacity` entries; the oldest is dropped to make room.
#[derive(Debug)]
pub struct HandshakeQueue {
    entries: Mutex<VecDeque<HandshakeEntry>>,
    capacity: usize,
}

impl HandshakeQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Remove and return the oldest entry for this device and key
    pub fn acknowledge(&self, device_id: &str, handshake_key: &str) -> Option<HandshakeEntry> {
        let mut entries = self.lock();
        let pos = entries
            .iter()
            .position(|e| e.device_id == device_id && e.handshake_key == handshake_key)?;
        entries.remove(pos)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<HandshakeEntry>> {
        // Entries stay consistent even if a holder panicked
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl HandshakeTracker for HandshakeQueue {
    fn append(&self, entry: HandshakeEntry) {
        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            if let Some(dropped) = entries.pop_front() {
                warn!(
                    "[HANDSHAKE] Queue full ({}), dropping unacknowledged {} from {}",
                    self.capacity, dropped.handshake_key, dropped.device_id
                );
            }
        }
        entries.push_back(entry);
    }
}
