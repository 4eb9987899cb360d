//! Windowed aggregation of change events.
//!
//! [`BatchInvalidation`] collects [`ChangeEvent`](crate::change::ChangeEvent)s
//! in a deduplicated queue and hands each window to
//! [`SelectiveInvalidation`](crate::invalidation::SelectiveInvalidation) as a
//! single unit: scopes are planned per change, unioned, and evicted once.
//! It is also the only writer of the dependency graph after start-up.

mod error;
mod processor;
mod queue;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use error::{BatchError, BatchResult};
pub use processor::{BatchInvalidation, BatchReport, BatchStatus, ChangeFailure};
pub use queue::ChangeQueue;

/// What closes a batch window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BatchStrategy {
    /// Flush once the window timer elapses.
    TimeBased,
    /// Flush when `max_batch_size` changes are pending.
    CountBased,
    /// Flush when the estimated scope reaches `size_threshold`.
    SizeBased,
    /// Whichever of the above fires first.
    #[default]
    Hybrid,
    /// Flush on every change.
    Immediate,
}

impl BatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStrategy::TimeBased => "time-based",
            BatchStrategy::CountBased => "count-based",
            BatchStrategy::SizeBased => "size-based",
            BatchStrategy::Hybrid => "hybrid",
            BatchStrategy::Immediate => "immediate",
        }
    }

    pub fn uses_timer(&self) -> bool {
        matches!(self, BatchStrategy::TimeBased | BatchStrategy::Hybrid)
    }

    pub fn uses_count(&self) -> bool {
        matches!(self, BatchStrategy::CountBased | BatchStrategy::Hybrid)
    }

    pub fn uses_size(&self) -> bool {
        matches!(self, BatchStrategy::SizeBased | BatchStrategy::Hybrid)
    }
}

impl fmt::Display for BatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "time-based" | "time" => Ok(BatchStrategy::TimeBased),
            "count-based" | "count" => Ok(BatchStrategy::CountBased),
            "size-based" | "size" => Ok(BatchStrategy::SizeBased),
            "hybrid" => Ok(BatchStrategy::Hybrid),
            "immediate" => Ok(BatchStrategy::Immediate),
            other => Err(format!("unknown batch strategy '{other}'")),
        }
    }
}
