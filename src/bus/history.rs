//! Local history ring buffers shared by the distributed back-ends.
//!
//! History is an observability convenience, not the durable event log —
//! durability is the transport's job. The distributed back-ends therefore
//! keep the same process-local ring the in-memory backend keeps.

use std::collections::VecDeque;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use super::channel::DEFAULT_HISTORY_CAPACITY;
use super::envelope::EventEnvelope;

pub(crate) struct HistoryBook {
    capacity: usize,
    channels: RwLock<FxHashMap<String, Mutex<VecDeque<EventEnvelope>>>>,
}

impl HistoryBook {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(FxHashMap::default()),
        }
    }

    pub(crate) fn record(&self, channel: &str, envelope: EventEnvelope) {
        {
            let channels = self.channels.read();
            if let Some(ring) = channels.get(channel) {
                let mut ring = ring.lock();
                if ring.len() == self.capacity {
                    ring.pop_front();
                }
                ring.push_back(envelope);
                return;
            }
        }
        let mut channels = self.channels.write();
        let ring = channels
            .entry(channel.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut ring = ring.lock();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(envelope);
    }

    /// Newest first.
    pub(crate) fn recent(&self, channel: &str, limit: usize) -> Vec<EventEnvelope> {
        let channels = self.channels.read();
        match channels.get(channel) {
            Some(ring) => ring.lock().iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn clear(&self, channel: &str) {
        let channels = self.channels.read();
        if let Some(ring) = channels.get(channel) {
            ring.lock().clear();
        }
    }
}

impl Default for HistoryBook {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
