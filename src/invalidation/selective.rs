//! Policy engine deciding which cache entries a change evicts.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use super::error::{InvalidationError, InvalidationResult};
use super::history::{InvalidationHistory, InvalidationRecord};
use super::impact::{ChangeImpact, ImpactAnalysis, ImpactClassifier};
use super::scope::InvalidationScope;
use super::strategy::InvalidationStrategy;
use crate::cache::{CacheStore, ContentHasher};
use crate::change::{ChangeEvent, ChangeType};
use crate::config::InvalidationConfig;
use crate::dependency::SharedDependencyTracker;
use crate::events::{CacheEvent, EventBus};
use crate::parsing::AstParser;

#[derive(Debug, Clone, Default)]
pub struct InvalidationOptions {
    /// Overrides the configured strategy for this call.
    pub strategy: Option<InvalidationStrategy>,
    /// Compute the scope without evicting anything.
    pub dry_run: bool,
    /// Restrict eviction to one branch.
    pub branch: Option<String>,
}

impl InvalidationOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Default::default()
        }
    }

    pub fn with_strategy(strategy: InvalidationStrategy) -> Self {
        Self {
            strategy: Some(strategy),
            ..Default::default()
        }
    }
}

/// A classified change with its computed scope, not yet applied.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidationPlan {
    pub file_path: PathBuf,
    pub strategy: InvalidationStrategy,
    pub analysis: ImpactAnalysis,
    /// `None` for no-op changes and for full clears.
    pub scope: Option<InvalidationScope>,
    pub clear_all: bool,
}

impl InvalidationPlan {
    pub fn impact(&self) -> ChangeImpact {
        self.analysis.impact
    }

    pub fn is_noop(&self) -> bool {
        !self.clear_all && self.analysis.impact == ChangeImpact::None
    }

    pub fn scope_size(&self) -> usize {
        self.scope.as_ref().map_or(0, |s| s.total)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvalidationOutcome {
    pub file_path: PathBuf,
    pub impact: ChangeImpact,
    pub reason: String,
    pub strategy: InvalidationStrategy,
    pub scope: Option<InvalidationScope>,
    /// Keys evicted (empty on dry runs and no-ops).
    pub invalidated: Vec<String>,
    pub record_id: Option<u64>,
    pub dry_run: bool,
    /// Files in scope whose entries could not all be evicted.
    pub failures: Vec<EvictionFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvictionFailure {
    pub file_path: PathBuf,
    pub message: String,
}

impl InvalidationOutcome {
    fn from_plan(plan: &InvalidationPlan, dry_run: bool) -> Self {
        Self {
            file_path: plan.file_path.clone(),
            impact: plan.analysis.impact,
            reason: plan.analysis.reason.clone(),
            strategy: plan.strategy,
            scope: plan.scope.clone(),
            invalidated: Vec::new(),
            record_id: None,
            dry_run,
            failures: Vec::new(),
        }
    }

    pub fn skipped(&self) -> bool {
        self.impact == ChangeImpact::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackReport {
    pub record_id: u64,
    pub restored: Vec<String>,
    /// Keys already purged from quarantine or re-occupied by newer entries.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvalidationStats {
    pub total_invalidations: u64,
    pub skipped_unchanged: u64,
    pub dry_runs: u64,
    pub keys_removed: u64,
    pub full_clears: u64,
    pub rollbacks: u64,
    pub by_impact: BTreeMap<ChangeImpact, u64>,
    pub history_len: usize,
}

#[derive(Debug)]
struct State {
    history: InvalidationHistory,
    stats: InvalidationStats,
}

#[derive(Debug)]
pub struct SelectiveInvalidation {
    project_root: PathBuf,
    store: Arc<CacheStore>,
    tracker: Option<SharedDependencyTracker>,
    classifier: ImpactClassifier,
    strategy: InvalidationStrategy,
    max_depth: usize,
    events: Option<EventBus>,
    state: Mutex<State>,
}

impl SelectiveInvalidation {
    pub fn new(
        project_root: impl Into<PathBuf>,
        store: Arc<CacheStore>,
        tracker: Option<SharedDependencyTracker>,
        hasher: Arc<ContentHasher>,
        parser: Arc<dyn AstParser>,
        config: &InvalidationConfig,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            store,
            tracker,
            classifier: ImpactClassifier::new(hasher, parser),
            strategy: config.strategy,
            max_depth: config.max_depth,
            events: None,
            state: Mutex::new(State {
                history: InvalidationHistory::new(config.history_size),
                stats: InvalidationStats::default(),
            }),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn strategy(&self) -> InvalidationStrategy {
        self.strategy
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn tracker(&self) -> Option<&SharedDependencyTracker> {
        self.tracker.as_ref()
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    fn relative(&self, path: &Path) -> InvalidationResult<PathBuf> {
        if !path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        path.strip_prefix(&self.project_root)
            .map(Path::to_path_buf)
            .map_err(|_| InvalidationError::OutsideProject {
                path: path.to_path_buf(),
                root: self.project_root.clone(),
            })
    }

    fn require_tracker(&self) -> InvalidationResult<&SharedDependencyTracker> {
        self.tracker.as_ref().ok_or_else(|| {
            InvalidationError::Configuration(
                "selective invalidation requires a dependency tracker".to_string(),
            )
        })
    }

    /// Classify `event` and compute its scope without touching the cache.
    pub fn plan(
        &self,
        event: &ChangeEvent,
        strategy: Option<InvalidationStrategy>,
    ) -> InvalidationResult<InvalidationPlan> {
        let strategy = strategy.unwrap_or(self.strategy);
        let file_path = self.relative(&event.file_path)?;

        if strategy == InvalidationStrategy::Immediate {
            return Ok(InvalidationPlan {
                file_path,
                strategy,
                analysis: ImpactAnalysis {
                    impact: ChangeImpact::Critical,
                    reason: "immediate strategy clears the cache".to_string(),
                    old_hash: None,
                    new_hash: None,
                },
                scope: None,
                clear_all: true,
            });
        }

        let tracker = self.require_tracker()?;
        let analysis = self.classifier.classify(event);
        if analysis.impact == ChangeImpact::None {
            return Ok(InvalidationPlan {
                file_path,
                strategy,
                analysis,
                scope: None,
                clear_all: false,
            });
        }

        let params = strategy
            .params()
            .map(|p| p.for_impact(analysis.impact, self.max_depth))
            .ok_or_else(|| {
                InvalidationError::Configuration(format!("strategy {strategy} has no scope"))
            })?;

        // A rename also evicts whatever was cached under the old name, and
        // the old name is what other files import.
        let (origin, direct) = match &event.change_type {
            ChangeType::Rename { from } => {
                let from = self.relative(from)?;
                (from.clone(), vec![from, file_path.clone()])
            }
            _ => (file_path.clone(), vec![file_path.clone()]),
        };

        let scope = {
            let tracker = tracker.read();
            InvalidationScope::compute(&tracker, &origin, direct, &params)
        };

        Ok(InvalidationPlan {
            file_path,
            strategy,
            analysis,
            scope: Some(scope),
            clear_all: false,
        })
    }

    /// Rough number of files a change to `file_path` would touch.
    pub fn estimate_scope_size(&self, file_path: &Path) -> usize {
        let Some(tracker) = &self.tracker else {
            return 1;
        };
        let depth = self
            .strategy
            .params()
            .map_or(1, |p| p.max_depth.min(self.max_depth.max(1)));
        let Ok(file_path) = self.relative(file_path) else {
            return 0;
        };
        let tracker = tracker.read();
        1 + tracker
            .dependent_levels(&file_path, depth)
            .iter()
            .map(Vec::len)
            .sum::<usize>()
    }

    /// Evict the union of every plan's scope once and record each plan.
    pub fn apply_plans(
        &self,
        plans: &[InvalidationPlan],
        branch: Option<&str>,
    ) -> InvalidationResult<Vec<InvalidationOutcome>> {
        let cleared: Option<Vec<String>> = if plans.iter().any(|p| p.clear_all) {
            let keys = self.store.clear()?;
            crate::log_event!("invalidation", "cleared", "{} entries", keys.len());
            Some(keys)
        } else {
            None
        };

        // Evict each distinct file once, remembering which keys it lost.
        // A failing file does not stop the others.
        let mut removed_by_file: HashMap<PathBuf, Vec<String>> = HashMap::new();
        let mut failed_files: HashMap<PathBuf, String> = HashMap::new();
        if cleared.is_none() {
            for plan in plans {
                let Some(scope) = &plan.scope else { continue };
                for file in scope.files() {
                    if removed_by_file.contains_key(&file) {
                        continue;
                    }
                    let (keys, error) =
                        self.store.try_invalidate_file(&file, &self.project_root, branch);
                    if let Some(error) = error {
                        tracing::warn!(
                            "[invalidation] eviction failed for {}: {error}",
                            file.display()
                        );
                        failed_files.insert(file.clone(), error.to_string());
                    }
                    removed_by_file.insert(file, keys);
                }
            }
        }

        let mut outcomes = Vec::with_capacity(plans.len());
        let mut state = self.state.lock();
        for plan in plans {
            let mut outcome = InvalidationOutcome::from_plan(plan, false);
            if plan.is_noop() {
                state.stats.skipped_unchanged += 1;
                crate::debug_event!(
                    "invalidation",
                    "skipped",
                    "{}: {}",
                    plan.file_path.display(),
                    plan.analysis.reason
                );
                outcomes.push(outcome);
                continue;
            }

            let invalidated = match &cleared {
                Some(keys) if plan.clear_all => keys.clone(),
                Some(_) => Vec::new(),
                None => plan
                    .scope
                    .as_ref()
                    .map(|scope| {
                        scope
                            .files()
                            .iter()
                            .filter_map(|f| removed_by_file.get(f))
                            .flatten()
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default(),
            };

            let record_id = state.history.push(InvalidationRecord {
                id: 0,
                file_path: plan.file_path.clone(),
                strategy: plan.strategy,
                impact: plan.analysis.impact,
                scope: plan.scope.clone(),
                invalidated: invalidated.clone(),
                timestamp: Utc::now(),
                rolled_back: false,
            });

            state.stats.total_invalidations += 1;
            state.stats.keys_removed += invalidated.len() as u64;
            if plan.clear_all {
                state.stats.full_clears += 1;
            }
            *state.stats.by_impact.entry(plan.analysis.impact).or_default() += 1;

            crate::log_event!(
                "invalidation",
                "applied",
                "{} [{}/{}] {} files, {} keys",
                plan.file_path.display(),
                plan.strategy,
                plan.analysis.impact,
                plan.scope_size(),
                invalidated.len()
            );
            if let Some(events) = &self.events {
                events.emit(CacheEvent::CacheInvalidate {
                    file_path: plan.file_path.clone(),
                    impact: Some(plan.analysis.impact),
                    strategy: Some(plan.strategy),
                    keys_removed: invalidated.len(),
                    record_id: Some(record_id),
                });
            }

            if let Some(scope) = &plan.scope {
                outcome.failures = scope
                    .files()
                    .into_iter()
                    .filter_map(|file| {
                        failed_files.get(&file).map(|message| EvictionFailure {
                            file_path: file,
                            message: message.clone(),
                        })
                    })
                    .collect();
            }
            outcome.invalidated = invalidated;
            outcome.record_id = Some(record_id);
            outcomes.push(outcome);
        }
        state.stats.history_len = state.history.len();

        Ok(outcomes)
    }

    /// Classify a change, compute its scope and evict it (unless dry run).
    pub fn invalidate_by_change(
        &self,
        event: &ChangeEvent,
        options: &InvalidationOptions,
    ) -> InvalidationResult<InvalidationOutcome> {
        let plan = self.plan(event, options.strategy)?;

        if options.dry_run {
            self.state.lock().stats.dry_runs += 1;
            return Ok(InvalidationOutcome::from_plan(&plan, true));
        }

        let mut outcomes = self.apply_plans(std::slice::from_ref(&plan), options.branch.as_deref())?;
        Ok(outcomes.remove(0))
    }

    /// Scope a change would have, without evicting anything.
    pub fn preview_invalidation(&self, event: &ChangeEvent) -> InvalidationResult<InvalidationOutcome> {
        self.invalidate_by_change(event, &InvalidationOptions::dry_run())
    }

    /// Restore the entries an invalidation evicted, where still possible.
    pub fn rollback_invalidation(&self, record_id: u64) -> InvalidationResult<RollbackReport> {
        let keys = {
            let state = self.state.lock();
            let record = state
                .history
                .get(record_id)
                .ok_or(InvalidationError::RecordNotFound(record_id))?;
            if record.rolled_back {
                return Err(InvalidationError::AlreadyRolledBack(record_id));
            }
            record.invalidated.clone()
        };

        let mut report = RollbackReport {
            record_id,
            restored: Vec::new(),
            missing: Vec::new(),
        };
        for key in keys {
            if self.store.restore(&key)? {
                report.restored.push(key);
            } else {
                report.missing.push(key);
            }
        }

        let mut state = self.state.lock();
        if let Some(record) = state.history.get_mut(record_id) {
            record.rolled_back = true;
        }
        state.stats.rollbacks += 1;

        crate::log_event!(
            "invalidation",
            "rolled back",
            "record {record_id}: {} restored, {} missing",
            report.restored.len(),
            report.missing.len()
        );
        Ok(report)
    }

    /// Newest records first.
    pub fn get_history(&self, limit: Option<usize>) -> Vec<InvalidationRecord> {
        self.state.lock().history.recent(limit)
    }

    pub fn get_stats(&self) -> InvalidationStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.history_len = state.history.len();
        stats
    }
}
