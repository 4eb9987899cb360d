//! Event broadcasting for cache consumers.
//!
//! Watchers, the batch processor and the invalidation engine publish typed
//! [`CacheEvent`]s on a shared [`EventBus`]. Any number of consumers can
//! subscribe; publishing with no subscribers is not an error.

use std::path::PathBuf;

use tokio::sync::broadcast;

use crate::change::ChangeEvent;
use crate::invalidation::{ChangeImpact, InvalidationStrategy};

/// Default channel capacity. Slow subscribers lag and skip events.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// Cache entries for `file_path` are stale. Emitted by the watcher as a
    /// hint and by the invalidation engine once entries are evicted.
    CacheInvalidate {
        file_path: PathBuf,
        impact: Option<ChangeImpact>,
        strategy: Option<InvalidationStrategy>,
        keys_removed: usize,
        record_id: Option<u64>,
    },
    FileChanged {
        root: PathBuf,
        change: ChangeEvent,
    },
    FileRenamed {
        root: PathBuf,
        from: PathBuf,
        to: PathBuf,
    },
    /// Catch-all for every classified file event.
    FileEvent {
        root: PathBuf,
        path: PathBuf,
        kind: &'static str,
    },
    WatchingStarted {
        root: PathBuf,
    },
    WatchingStopped {
        root: PathBuf,
    },
    Error {
        root: Option<PathBuf>,
        message: String,
    },
    ChangeQueued {
        file_path: PathBuf,
        pending: usize,
    },
    BatchComplete {
        batch_id: u64,
        changes: usize,
        keys_removed: usize,
        duration_ms: u64,
    },
    BatchError {
        batch_id: u64,
        file_path: PathBuf,
        message: String,
    },
}

impl CacheEvent {
    /// Stable wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::CacheInvalidate { .. } => "cache-invalidate",
            CacheEvent::FileChanged { .. } => "file-changed",
            CacheEvent::FileRenamed { .. } => "file-renamed",
            CacheEvent::FileEvent { .. } => "file-event",
            CacheEvent::WatchingStarted { .. } => "watching-started",
            CacheEvent::WatchingStopped { .. } => "watching-stopped",
            CacheEvent::Error { .. } => "error",
            CacheEvent::ChangeQueued { .. } => "changeQueued",
            CacheEvent::BatchComplete { .. } => "batchComplete",
            CacheEvent::BatchError { .. } => "batchError",
        }
    }
}

/// Broadcasts cache events to every subscriber.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: CacheEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(count) => {
                crate::debug_event!("events", "sent", "{name} to {count} subscribers");
            }
            Err(_) => {
                crate::debug_event!("events", "dropped", "no subscribers for {name}");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
