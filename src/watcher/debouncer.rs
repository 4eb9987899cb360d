//! Per-key debouncing of raw file events.
//!
//! Editors often write a file several times per save (truncate, write,
//! chmod, rename-over). A key becomes ready once it has been quiet for the
//! debounce duration; every new event restarts its timer.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Debouncer<K> {
    /// Pending keys and the time of their latest event.
    pending: HashMap<K, Instant>,
    duration: Duration,
}

impl<K: Eq + Hash + Clone> Debouncer<K> {
    pub fn new(duration: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            duration,
        }
    }

    pub fn from_millis(debounce_ms: u64) -> Self {
        Self::new(Duration::from_millis(debounce_ms))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Record an event for `key`, restarting its timer.
    pub fn record(&mut self, key: K) {
        self.record_at(key, Instant::now());
    }

    pub fn record_at(&mut self, key: K, at: Instant) {
        self.pending.insert(key, at);
    }

    /// Drop a pending key without firing it.
    pub fn remove(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Drop every pending key.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Keys quiet for the debounce duration, removed from pending.
    pub fn take_ready(&mut self) -> Vec<K> {
        self.take_ready_at(Instant::now())
    }

    pub fn take_ready_at(&mut self, now: Instant) -> Vec<K> {
        let mut ready = Vec::new();
        self.pending.retain(|key, last_event| {
            if now.saturating_duration_since(*last_event) >= self.duration {
                ready.push(key.clone());
                false
            } else {
                true
            }
        });
        ready
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
