use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::CacheKey;
use crate::parsing::AstSummary;

/// One cached parse result. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub ast: AstSummary,
    pub stored_at: DateTime<Utc>,
    /// Normalized content hash of the source the AST came from.
    pub source_hash: String,
    /// Serialized size of the AST in bytes.
    pub size: u64,
}

impl CacheEntry {
    pub fn new(key: CacheKey, ast: AstSummary, source_hash: impl Into<String>) -> Self {
        Self::stored_at(key, ast, source_hash, Utc::now())
    }

    pub fn stored_at(
        key: CacheKey,
        ast: AstSummary,
        source_hash: impl Into<String>,
        stored_at: DateTime<Utc>,
    ) -> Self {
        let size = ast.estimated_size() as u64;
        Self {
            key,
            ast,
            stored_at,
            source_hash: source_hash.into(),
            size,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.stored_at)
    }
}

/// Bookkeeping the cleaner needs, without the AST payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInfo {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub size: u64,
}

/// An evicted entry kept around for rollback.
#[derive(Debug, Clone)]
pub struct QuarantinedEntry {
    pub entry: CacheEntry,
    pub evicted_at: DateTime<Utc>,
}
