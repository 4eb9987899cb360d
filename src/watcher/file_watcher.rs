//! Recursive project watcher feeding the batch processor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use super::error::WatchError;
use super::filter::WatchFilter;
use super::root::RootState;
use crate::cache::CacheKeyGenerator;
use crate::change::{ChangeEvent, ChangeSink, ChangeType};
use crate::config::WatcherConfig;
use crate::events::{CacheEvent, EventBus};

/// Raw events buffered between the notify thread and a root's worker.
const EVENT_BUFFER: usize = 1024;

struct RootHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    state: Arc<Mutex<RootState>>,
    #[cfg(test)]
    raw: mpsc::Sender<notify::Result<Event>>,
}

/// Watches project roots and turns file activity into [`ChangeEvent`]s.
///
/// Each root runs its own worker task owning a `notify` watcher. Raw
/// events are filtered, debounced per root-relative path and classified
/// against content snapshots, then published on the [`EventBus`] and
/// forwarded to the configured [`ChangeSink`].
pub struct FileWatcher {
    filter: WatchFilter,
    config: WatcherConfig,
    events: EventBus,
    sink: Option<Arc<dyn ChangeSink>>,
    roots: Mutex<HashMap<PathBuf, RootHandle>>,
}

impl FileWatcher {
    pub fn new(keys: Arc<CacheKeyGenerator>, config: &WatcherConfig, events: EventBus) -> Self {
        Self {
            filter: WatchFilter::new(keys),
            config: config.clone(),
            events,
            sink: None,
            roots: Mutex::new(HashMap::new()),
        }
    }

    /// Forward every change to `sink` (usually the batch processor).
    pub fn with_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Never report files below `dir`, such as the cache directory.
    pub fn ignore_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.filter
            .ignore_dir(dir.canonicalize().unwrap_or(dir));
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Start watching `root` recursively. Requires a tokio runtime.
    pub fn watch(&self, root: impl AsRef<Path>) -> Result<PathBuf, WatchError> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(|_| WatchError::RootMissing(root.as_ref().to_path_buf()))?;
        let runtime = Handle::try_current().map_err(|_| WatchError::NoRuntime)?;

        let mut roots = self.roots.lock();
        if roots.get(&root).is_some_and(|h| !h.task.is_finished()) {
            return Err(WatchError::AlreadyWatching(root));
        }

        let mut state = RootState::new(
            root.clone(),
            self.filter.clone(),
            self.config.debounce_ms,
            self.config.snapshot_max_bytes,
        );
        state.snapshot_all();
        let state = Arc::new(Mutex::new(state));

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        #[cfg(test)]
        let raw = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: root.clone(),
                reason: e.to_string(),
            })?;

        let cancel = CancellationToken::new();
        let worker = RootWorker {
            root: root.clone(),
            state: state.clone(),
            events: self.events.clone(),
            sink: self.sink.clone(),
            cancel: cancel.clone(),
            tick: tick_interval(self.config.debounce_ms),
        };
        let task = runtime.spawn(worker.run(watcher, rx));

        roots.insert(
            root.clone(),
            RootHandle {
                cancel,
                task,
                state,
                #[cfg(test)]
                raw,
            },
        );
        drop(roots);

        crate::log_event!("watcher", "started", "{}", root.display());
        self.events.emit(CacheEvent::WatchingStarted { root: root.clone() });
        Ok(root)
    }

    /// Stop one root. Its pending debounce entries are dropped before this
    /// returns, so none of them fires afterwards.
    pub fn stop_watching(&self, root: impl AsRef<Path>) -> bool {
        let root = root.as_ref();
        let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let Some(handle) = self.roots.lock().remove(&key) else {
            return false;
        };
        self.shutdown_root(&key, handle);
        true
    }

    pub fn stop_all(&self) {
        let roots: Vec<(PathBuf, RootHandle)> = self.roots.lock().drain().collect();
        for (root, handle) in roots {
            self.shutdown_root(&root, handle);
        }
    }

    fn shutdown_root(&self, root: &Path, handle: RootHandle) {
        handle.cancel.cancel();
        handle.state.lock().clear_pending();
        handle.task.abort();
        crate::log_event!("watcher", "stopped", "{}", root.display());
        self.events.emit(CacheEvent::WatchingStopped {
            root: root.to_path_buf(),
        });
    }

    pub fn is_watching(&self, root: impl AsRef<Path>) -> bool {
        let root = root.as_ref();
        let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        self.roots
            .lock()
            .get(&key)
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Feed a raw notify result to a root's worker as if the OS sent it.
    #[cfg(test)]
    async fn inject(&self, root: &Path, res: notify::Result<Event>) {
        let raw = self.roots.lock().get(root).map(|h| h.raw.clone());
        if let Some(raw) = raw {
            let _ = raw.send(res).await;
        }
    }

    pub fn watched_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .roots
            .lock()
            .iter()
            .filter(|(_, h)| !h.task.is_finished())
            .map(|(root, _)| root.clone())
            .collect();
        roots.sort();
        roots
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Debounce polling period: fine enough for short debounce windows.
fn tick_interval(debounce_ms: u64) -> Duration {
    Duration::from_millis((debounce_ms / 2).clamp(10, 100))
}

struct RootWorker {
    root: PathBuf,
    state: Arc<Mutex<RootState>>,
    events: EventBus,
    sink: Option<Arc<dyn ChangeSink>>,
    cancel: CancellationToken,
    tick: Duration,
}

impl RootWorker {
    async fn run(
        self,
        _watcher: notify::RecommendedWatcher,
        mut rx: mpsc::Receiver<notify::Result<Event>>,
    ) {
        // One ticker for the whole loop: raw events must not postpone it.
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                Some(res) = rx.recv() => match res {
                    Ok(event) => {
                        let renames = self.state.lock().record(&event, Instant::now());
                        self.publish(renames).await;
                    }
                    Err(e) => {
                        self.fail(format!("file watch error: {e}"));
                        break;
                    }
                },

                _ = ticker.tick() => {
                    let ready = {
                        let mut state = self.state.lock();
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        state.take_ready(Instant::now())
                    };
                    self.publish(ready).await;
                }
            }
        }
        crate::debug_event!("watcher", "worker exited", "{}", self.root.display());
    }

    fn fail(&self, message: String) {
        tracing::error!("[watcher] {}: {message}", self.root.display());
        self.events.emit(CacheEvent::Error {
            root: Some(self.root.clone()),
            message,
        });
        self.state.lock().clear_pending();
        self.events.emit(CacheEvent::WatchingStopped {
            root: self.root.clone(),
        });
    }

    async fn publish(&self, changes: Vec<ChangeEvent>) {
        for change in changes {
            if self.cancel.is_cancelled() {
                return;
            }

            crate::log_event!(
                "watcher",
                change.change_type.as_str(),
                "{}",
                change.file_path.display()
            );
            match &change.change_type {
                ChangeType::Rename { from } => self.events.emit(CacheEvent::FileRenamed {
                    root: self.root.clone(),
                    from: from.clone(),
                    to: change.file_path.clone(),
                }),
                _ => self.events.emit(CacheEvent::FileChanged {
                    root: self.root.clone(),
                    change: change.clone(),
                }),
            }
            self.events.emit(CacheEvent::FileEvent {
                root: self.root.clone(),
                path: change.file_path.clone(),
                kind: change.change_type.as_str(),
            });
            let stale = match &change.change_type {
                ChangeType::Rename { from } => from.clone(),
                _ => change.file_path.clone(),
            };
            self.events.emit(CacheEvent::CacheInvalidate {
                file_path: stale,
                impact: None,
                strategy: None,
                keys_removed: 0,
                record_id: None,
            });

            if let Some(sink) = &self.sink {
                sink.submit(change).await;
            }
        }
    }
}
