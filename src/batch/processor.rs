use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::BatchStrategy;
use super::error::{BatchError, BatchResult};
use super::queue::ChangeQueue;
use crate::change::{ChangeEvent, ChangeSink, ChangeType};
use crate::config::BatchConfig;
use crate::dependency::DependencyTracker;
use crate::events::{CacheEvent, EventBus};
use crate::invalidation::{
    InvalidationOutcome, InvalidationPlan, InvalidationScope, SelectiveInvalidation,
};
use crate::parsing::AstParser;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeFailure {
    pub file_path: PathBuf,
    pub message: String,
}

/// Result of one flushed window.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: u64,
    /// Changes taken from the queue for this window.
    pub changes: usize,
    pub processed: usize,
    /// Changes whose content was unchanged after normalization.
    pub skipped: usize,
    /// Changes pushed back to the next window by `max_scope_size`.
    pub deferred: usize,
    pub failures: Vec<ChangeFailure>,
    pub keys_removed: usize,
    pub duration_ms: u64,
    #[serde(skip)]
    pub outcomes: Vec<InvalidationOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatus {
    pub strategy: BatchStrategy,
    pub pending: usize,
    pub estimated_scope: usize,
    /// Milliseconds until the window timer fires, if one is armed.
    pub next_flush_ms: Option<u64>,
    pub total_batches: u64,
    pub total_changes: u64,
    pub total_failures: u64,
    pub total_keys_removed: u64,
    pub last_flush: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Totals {
    batches: u64,
    changes: u64,
    failures: u64,
    keys_removed: u64,
    last_flush: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    queue: ChangeQueue,
    deadline: Option<Instant>,
    totals: Totals,
}

struct Inner {
    engine: Arc<SelectiveInvalidation>,
    parser: Arc<dyn AstParser>,
    config: BatchConfig,
    events: Option<EventBus>,
    state: Mutex<State>,
    /// Serializes flushes; the graph writer lives behind it.
    flush_lock: Mutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
    next_batch_id: AtomicU64,
    shut_down: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Aggregates change events into windows and invalidates each window once.
///
/// Cheap to clone; clones share the queue. The window timer needs a tokio
/// runtime; without one, windows close only on count/size triggers or an
/// explicit [`BatchInvalidation::flush_batches`].
#[derive(Clone)]
pub struct BatchInvalidation {
    inner: Arc<Inner>,
}

impl fmt::Debug for BatchInvalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchInvalidation")
            .field("strategy", &self.inner.config.strategy)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl BatchInvalidation {
    pub fn new(
        engine: Arc<SelectiveInvalidation>,
        parser: Arc<dyn AstParser>,
        config: &BatchConfig,
        events: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                parser,
                config: config.clone(),
                events,
                state: Mutex::new(State::default()),
                flush_lock: Mutex::new(()),
                timer: Mutex::new(None),
                next_batch_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn strategy(&self) -> BatchStrategy {
        self.inner.config.strategy
    }

    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(events) = &self.inner.events {
            events.emit(event);
        }
    }

    /// Queue a change. Returns the reports of any flush it triggered.
    pub fn queue_change(&self, change: ChangeEvent) -> BatchResult<Vec<BatchReport>> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(BatchError::ShutDown);
        }

        let config = &self.inner.config;
        let estimate = self.inner.engine.estimate_scope_size(&change.file_path);
        let file_path = change.file_path.clone();

        let (pending, triggered) = {
            let mut state = self.inner.state.lock();
            state.queue.push(change, estimate);
            let pending = state.queue.len();
            let triggered = match config.strategy {
                BatchStrategy::Immediate => true,
                strategy => {
                    (strategy.uses_count() && pending >= config.max_batch_size)
                        || (strategy.uses_size()
                            && state.queue.estimated_scope() >= config.size_threshold)
                }
            };
            if !triggered && config.strategy.uses_timer() {
                state.deadline = Some(Instant::now() + config.window());
            }
            (pending, triggered)
        };

        crate::debug_event!("batch", "queued", "{} ({pending} pending)", file_path.display());
        self.emit(CacheEvent::ChangeQueued { file_path, pending });

        if triggered {
            return Ok(self.flush_batches());
        }
        if config.strategy.uses_timer() {
            self.arm_timer();
        }
        Ok(Vec::new())
    }

    /// Bulk form of [`BatchInvalidation::queue_change`].
    pub fn queue_changes(
        &self,
        changes: impl IntoIterator<Item = ChangeEvent>,
    ) -> BatchResult<Vec<BatchReport>> {
        let mut reports = Vec::new();
        for change in changes {
            reports.extend(self.queue_change(change)?);
        }
        Ok(reports)
    }

    /// (Re)start the window timer.
    fn arm_timer(&self) {
        let Ok(runtime) = Handle::try_current() else {
            crate::debug_event!("batch", "no runtime", "window closes on explicit flush");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let window = self.inner.config.window();
        let task = runtime.spawn(async move {
            tokio::time::sleep(window).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.timer.lock().take();
            BatchInvalidation { inner }.flush_batches();
        });

        if let Some(previous) = self.inner.timer.lock().replace(task) {
            previous.abort();
        }
    }

    /// Drain the queue window by window. Changes deferred by
    /// `max_scope_size` go to the following window.
    pub fn flush_batches(&self) -> Vec<BatchReport> {
        let _flush = self.inner.flush_lock.lock();
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }

        let limit = self.inner.config.max_batch_size.max(1);
        let mut reports = Vec::new();
        loop {
            let window = {
                let mut state = self.inner.state.lock();
                state.deadline = None;
                state.queue.take(limit)
            };
            if window.is_empty() {
                break;
            }

            let (report, deferred) = self.process_window(window);

            let mut state = self.inner.state.lock();
            if !deferred.is_empty() {
                state.queue.requeue_front(deferred);
            }
            let totals = &mut state.totals;
            totals.batches += 1;
            totals.changes += report.processed as u64;
            totals.failures += report.failures.len() as u64;
            totals.keys_removed += report.keys_removed as u64;
            totals.last_flush = Some(Utc::now());
            drop(state);

            reports.push(report);
        }
        reports
    }

    fn process_window(&self, changes: Vec<ChangeEvent>) -> (BatchReport, Vec<ChangeEvent>) {
        let engine = &self.inner.engine;
        let batch_id = self.inner.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let taken = changes.len();

        let mut failures = Vec::new();
        let mut deferred = Vec::new();
        let mut planned: Vec<(ChangeEvent, InvalidationPlan)> = Vec::new();
        let mut union = InvalidationScope::default();

        // Plan against the graph as it was before this window, so a deleted
        // file still reaches its importers.
        for change in changes {
            if !deferred.is_empty() {
                deferred.push(change);
                continue;
            }
            let plan = match engine.plan(&change, None) {
                Ok(plan) => plan,
                Err(source) => {
                    let error = BatchError::Change {
                        path: change.file_path.clone(),
                        source,
                    };
                    self.record_failure(batch_id, &mut failures, error);
                    continue;
                }
            };
            if let Some(scope) = &plan.scope {
                let mut candidate = union.clone();
                candidate.merge(scope);
                if !planned.is_empty() && candidate.total > self.inner.config.max_scope_size {
                    deferred.push(change);
                    continue;
                }
                union = candidate;
            }
            planned.push((change, plan));
        }

        if let Some(tracker) = engine.tracker() {
            let mut tracker = tracker.write();
            for (change, plan) in &planned {
                self.update_graph(&mut tracker, change, &plan.file_path);
            }
        }

        let plans: Vec<InvalidationPlan> = planned.iter().map(|(_, plan)| plan.clone()).collect();
        let outcomes = match engine.apply_plans(&plans, None) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                let message = e.to_string();
                for (change, _) in &planned {
                    self.record_failure(
                        batch_id,
                        &mut failures,
                        BatchError::Eviction {
                            path: change.file_path.clone(),
                            message: message.clone(),
                        },
                    );
                }
                Vec::new()
            }
        };
        for outcome in &outcomes {
            for failure in &outcome.failures {
                self.record_failure(
                    batch_id,
                    &mut failures,
                    BatchError::Eviction {
                        path: failure.file_path.clone(),
                        message: failure.message.clone(),
                    },
                );
            }
        }

        let keys_removed = outcomes.iter().map(|o| o.invalidated.len()).sum();
        let duration_ms = started.elapsed().as_millis() as u64;
        let report = BatchReport {
            batch_id,
            changes: taken,
            processed: outcomes.len(),
            skipped: outcomes.iter().filter(|o| o.skipped()).count(),
            deferred: deferred.len(),
            failures,
            keys_removed,
            duration_ms,
            outcomes,
        };

        crate::log_event!(
            "batch",
            "complete",
            "#{batch_id}: {} processed, {} keys, {} failed, {} deferred in {duration_ms}ms",
            report.processed,
            keys_removed,
            report.failures.len(),
            report.deferred
        );
        self.emit(CacheEvent::BatchComplete {
            batch_id,
            changes: report.processed,
            keys_removed,
            duration_ms,
        });

        (report, deferred)
    }

    fn update_graph(&self, tracker: &mut DependencyTracker, change: &ChangeEvent, file: &Path) {
        match &change.change_type {
            ChangeType::Delete => tracker.remove_file(file),
            ChangeType::Rename { from } => {
                tracker.remove_file(from);
                self.refresh_imports(tracker, change, file);
            }
            ChangeType::Add | ChangeType::Modify => self.refresh_imports(tracker, change, file),
        }
    }

    fn refresh_imports(&self, tracker: &mut DependencyTracker, change: &ChangeEvent, file: &Path) {
        let content = change.new_content.clone().or_else(|| {
            std::fs::read_to_string(self.inner.engine.project_root().join(file)).ok()
        });
        let imports = content.and_then(|content| {
            self.inner
                .parser
                .parse_file(file, &content)
                .into_ast()
                .map(|ast| ast.imports)
        });
        match imports {
            Some(imports) => {
                tracker.update_from_imports(file, &imports);
            }
            None => {
                tracker.add_file(file);
            }
        }
    }

    fn record_failure(&self, batch_id: u64, failures: &mut Vec<ChangeFailure>, error: BatchError) {
        let file_path = match &error {
            BatchError::Change { path, .. } | BatchError::Eviction { path, .. } => path.clone(),
            BatchError::ShutDown => PathBuf::new(),
        };
        let message = error.to_string();
        tracing::warn!("[batch] batch {batch_id}: {message}");
        self.emit(CacheEvent::BatchError {
            batch_id,
            file_path: file_path.clone(),
            message: message.clone(),
        });
        failures.push(ChangeFailure { file_path, message });
    }

    pub fn get_batch_status(&self) -> BatchStatus {
        let state = self.inner.state.lock();
        let now = Instant::now();
        BatchStatus {
            strategy: self.inner.config.strategy,
            pending: state.queue.len(),
            estimated_scope: state.queue.estimated_scope(),
            next_flush_ms: state
                .deadline
                .map(|deadline| deadline.saturating_duration_since(now).as_millis() as u64),
            total_batches: state.totals.batches,
            total_changes: state.totals.changes,
            total_failures: state.totals.failures,
            total_keys_removed: state.totals.keys_removed,
            last_flush: state.totals.last_flush,
        }
    }

    /// Stop accepting changes, cancel the timer and flush what is queued.
    pub fn shutdown(&self) -> Vec<BatchReport> {
        self.inner.shut_down.store(true, Ordering::Release);
        let reports = self.flush_batches();
        crate::log_event!("batch", "shut down", "{} final batches", reports.len());
        reports
    }
}

#[async_trait]
impl ChangeSink for BatchInvalidation {
    async fn submit(&self, change: ChangeEvent) {
        if let Err(e) = self.queue_change(change) {
            tracing::warn!("[batch] change rejected: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, CacheStore, ContentHasher};
    use crate::config::InvalidationConfig;
    use crate::dependency::{FileImports, TrackerOptions};
    use crate::language::Language;
    use crate::parsing::{AstSummary, ImportKind, ImportRef, SurfaceParser};
    use std::time::Duration;

    struct Fixture {
        batch: BatchInvalidation,
        engine: Arc<SelectiveInvalidation>,
        store: Arc<CacheStore>,
        events: EventBus,
    }

    fn fixture(config: BatchConfig) -> Fixture {
        let import = |s: &str| vec![ImportRef::new(s, ImportKind::Import)];
        let mut tracker = DependencyTracker::new("/p", TrackerOptions::default());
        tracker.build_dependency_graph(vec![
            FileImports::new("utils/math.js", vec![]),
            FileImports::new("calc.js", import("./utils/math")),
            FileImports::new("app.js", import("./calc")),
        ]);

        let store = Arc::new(CacheStore::in_memory());
        for path in ["utils/math.js", "calc.js", "app.js"] {
            let key = CacheKey::new(Language::JavaScript, "main", "00000000", path);
            store.set(&key, AstSummary::default(), "h").unwrap();
        }

        let parser: Arc<dyn AstParser> = Arc::new(SurfaceParser::new());
        let engine = Arc::new(SelectiveInvalidation::new(
            "/p",
            store.clone(),
            Some(tracker.into_shared()),
            Arc::new(ContentHasher::new()),
            parser.clone(),
            &InvalidationConfig::default(),
        ));
        let events = EventBus::new(64);
        let batch = BatchInvalidation::new(engine.clone(), parser, &config, Some(events.clone()));
        Fixture {
            batch,
            engine,
            store,
            events,
        }
    }

    fn config(strategy: BatchStrategy) -> BatchConfig {
        BatchConfig {
            strategy,
            window_ms: 50,
            ..Default::default()
        }
    }

    fn touch(name: &str) -> ChangeEvent {
        ChangeEvent::modified(format!("/p/{name}"), None, None)
    }

    #[tokio::test]
    async fn test_time_window_produces_one_batch() {
        let f = fixture(config(BatchStrategy::TimeBased));
        let mut rx = f.events.subscribe();
        for i in 0..5 {
            let reports = f.batch.queue_change(touch(&format!("f{i}.js"))).unwrap();
            assert!(reports.is_empty());
        }
        assert_eq!(f.batch.get_batch_status().pending, 5);
        assert!(f.batch.get_batch_status().next_flush_ms.is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = f.batch.get_batch_status();
        assert_eq!(status.pending, 0);
        assert_eq!(status.total_batches, 1);
        assert_eq!(status.total_changes, 5);

        let mut completed = 0;
        while let Ok(event) = rx.try_recv() {
            if let CacheEvent::BatchComplete { changes, .. } = event {
                assert_eq!(changes, 5);
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
    }

    #[test]
    fn test_count_trigger_without_runtime() {
        let f = fixture(BatchConfig {
            max_batch_size: 3,
            ..config(BatchStrategy::CountBased)
        });
        assert!(f.batch.queue_change(touch("a.js")).unwrap().is_empty());
        assert!(f.batch.queue_change(touch("b.js")).unwrap().is_empty());
        // Duplicate path does not count twice.
        assert!(f.batch.queue_change(touch("a.js")).unwrap().is_empty());
        let reports = f.batch.queue_change(touch("c.js")).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].processed, 3);
        assert_eq!(f.batch.pending(), 0);
    }

    #[test]
    fn test_size_trigger() {
        let f = fixture(BatchConfig {
            size_threshold: 3,
            ..config(BatchStrategy::SizeBased)
        });
        // utils/math.js reaches calc.js and app.js: estimate 3.
        let reports = f.batch.queue_change(touch("utils/math.js")).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].keys_removed, 3);
    }

    #[test]
    fn test_immediate_flushes_every_change() {
        let f = fixture(config(BatchStrategy::Immediate));
        assert_eq!(f.batch.queue_change(touch("app.js")).unwrap().len(), 1);
        assert_eq!(f.batch.queue_change(touch("calc.js")).unwrap().len(), 1);
        assert_eq!(f.batch.get_batch_status().total_batches, 2);
    }

    #[test]
    fn test_scope_bound_defers_to_next_window() {
        let f = fixture(BatchConfig {
            max_scope_size: 2,
            ..config(BatchStrategy::TimeBased)
        });
        f.batch
            .queue_changes(["x1.js", "x2.js", "x3.js"].map(touch))
            .unwrap();
        let reports = f.batch.flush_batches();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].processed, 2);
        assert_eq!(reports[0].deferred, 1);
        assert_eq!(reports[1].processed, 1);
        assert_eq!(reports[1].outcomes[0].file_path, PathBuf::from("x3.js"));
    }

    #[test]
    fn test_partial_failure_reports_only_failing_change() {
        let f = fixture(config(BatchStrategy::TimeBased));
        let mut rx = f.events.subscribe();
        f.batch
            .queue_changes([
                ChangeEvent::modified("/elsewhere/x.js", None, None),
                touch("app.js"),
            ])
            .unwrap();
        let reports = f.batch.flush_batches();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].processed, 1);
        assert_eq!(reports[0].failures.len(), 1);
        assert_eq!(
            reports[0].failures[0].file_path,
            PathBuf::from("/elsewhere/x.js")
        );
        assert_eq!(reports[0].keys_removed, 1);
        assert_eq!(f.store.len(), 2);

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert!(names.contains(&"batchError"));
        assert!(names.contains(&"batchComplete"));
    }

    #[test]
    fn test_delete_reaches_importers_then_updates_graph() {
        let f = fixture(config(BatchStrategy::TimeBased));
        f.batch
            .queue_change(ChangeEvent::deleted("/p/utils/math.js", None))
            .unwrap();
        let reports = f.batch.flush_batches();
        assert_eq!(reports[0].keys_removed, 3);
        assert!(f.store.is_empty());

        let tracker = f.engine.tracker().unwrap().read();
        assert!(tracker.get_dependencies(Path::new("calc.js")).is_empty());
        assert!(!tracker.contains(Path::new("utils/math.js")));
    }

    #[test]
    fn test_modify_drops_vanished_import() {
        let f = fixture(config(BatchStrategy::TimeBased));
        f.batch
            .queue_change(ChangeEvent::modified(
                "/p/calc.js",
                Some("import { add } from './utils/math';\nexport const x = add(1, 2);\n".into()),
                Some("export const x = 3;\n".into()),
            ))
            .unwrap();
        f.batch.flush_batches();

        let tracker = f.engine.tracker().unwrap().read();
        assert!(tracker.get_dependents(Path::new("utils/math.js")).is_empty());
        assert_eq!(tracker.get_dependents(Path::new("calc.js")), vec![PathBuf::from("app.js")]);
    }

    #[test]
    fn test_shutdown_flushes_and_rejects() {
        let f = fixture(config(BatchStrategy::TimeBased));
        f.batch.queue_change(touch("app.js")).unwrap();
        let reports = f.batch.shutdown();
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            f.batch.queue_change(touch("calc.js")),
            Err(BatchError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_change_sink() {
        let f = fixture(config(BatchStrategy::CountBased));
        f.batch.submit(touch("app.js")).await;
        assert_eq!(f.batch.pending(), 1);
    }
}
