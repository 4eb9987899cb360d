use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::change::{ChangeEvent, ChangeType};

#[derive(Debug, Clone)]
struct Pending {
    event: ChangeEvent,
    /// Estimated number of files the change would evict.
    estimate: usize,
}

/// Pending changes keyed by path, in first-queued order.
///
/// A later change to a queued path replaces the earlier one but keeps its
/// position and its baseline content, so the planner still compares
/// against what was on disk before the window opened.
#[derive(Debug, Default)]
pub struct ChangeQueue {
    pending: IndexMap<PathBuf, Pending>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `event`. Returns `true` when it replaced a pending change.
    pub fn push(&mut self, event: ChangeEvent, estimate: usize) -> bool {
        let path = event.file_path.clone();
        match self.pending.get_mut(&path) {
            Some(existing) => {
                existing.event = coalesce(existing.event.clone(), event);
                existing.estimate = estimate;
                true
            }
            None => {
                self.pending.insert(path, Pending { event, estimate });
                false
            }
        }
    }

    /// Remove and return up to `limit` of the oldest changes.
    pub fn take(&mut self, limit: usize) -> Vec<ChangeEvent> {
        let count = limit.min(self.pending.len());
        self.pending.drain(..count).map(|(_, p)| p.event).collect()
    }

    /// Put changes back at the front, ahead of anything queued since.
    ///
    /// A path queued again in the meantime keeps the newer change, with the
    /// requeued one as its baseline.
    pub fn requeue_front(&mut self, events: Vec<ChangeEvent>) {
        for (index, event) in events.into_iter().enumerate() {
            let path = event.file_path.clone();
            let merged = match self.pending.shift_remove(&path) {
                Some(newer) => Pending {
                    event: coalesce(event, newer.event),
                    estimate: newer.estimate,
                },
                None => Pending { event, estimate: 1 },
            };
            let index = index.min(self.pending.len());
            self.pending.shift_insert(index, path, merged);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    /// Sum of the per-change scope estimates.
    pub fn estimated_scope(&self) -> usize {
        self.pending.values().map(|p| p.estimate).sum()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.pending.keys()
    }
}

/// Fold two changes to the same path into one.
fn coalesce(earlier: ChangeEvent, later: ChangeEvent) -> ChangeEvent {
    let baseline = earlier.old_content.clone();
    match (earlier.change_type, later.change_type.clone()) {
        // Still new to the graph, whatever happened to it since.
        (ChangeType::Add, ChangeType::Modify) => ChangeEvent {
            change_type: ChangeType::Add,
            ..later
        },
        // Replaced on disk: compare against the deleted content.
        (ChangeType::Delete, ChangeType::Add) => ChangeEvent {
            change_type: ChangeType::Modify,
            old_content: baseline,
            ..later
        },
        (ChangeType::Modify, ChangeType::Modify) => ChangeEvent {
            old_content: baseline,
            ..later
        },
        (ChangeType::Rename { from }, ChangeType::Modify) => ChangeEvent {
            change_type: ChangeType::Rename { from },
            old_content: baseline,
            ..later
        },
        _ => later,
    }
}
