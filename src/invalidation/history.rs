//! Bounded audit trail of executed invalidations.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::impact::ChangeImpact;
use super::scope::InvalidationScope;
use super::strategy::InvalidationStrategy;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidationRecord {
    pub id: u64,
    pub file_path: PathBuf,
    pub strategy: InvalidationStrategy,
    pub impact: ChangeImpact,
    /// `None` when the whole cache was cleared.
    pub scope: Option<InvalidationScope>,
    /// Cache keys evicted by this invalidation.
    pub invalidated: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub rolled_back: bool,
}

/// Ring buffer of records; the oldest is dropped once full.
#[derive(Debug)]
pub struct InvalidationHistory {
    records: VecDeque<InvalidationRecord>,
    capacity: usize,
    next_id: u64,
}

impl InvalidationHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    /// Append a record, assigning its id.
    pub fn push(&mut self, mut record: InvalidationRecord) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        record.id = id;
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        id
    }

    pub fn get(&self, id: u64) -> Option<&InvalidationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut InvalidationRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    /// Newest first, at most `limit` records.
    pub fn recent(&self, limit: Option<usize>) -> Vec<InvalidationRecord> {
        self.records
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
