//! Selective invalidation.
//!
//! A change is classified by [`ImpactClassifier`], scoped against the
//! dependency graph according to an [`InvalidationStrategy`], and applied to
//! the [`CacheStore`](crate::cache::CacheStore) by [`SelectiveInvalidation`],
//! which keeps a bounded history so an invalidation can be rolled back.

mod error;
mod history;
mod impact;
mod scope;
mod selective;
mod strategy;

pub use error::{InvalidationError, InvalidationResult};
pub use history::{InvalidationHistory, InvalidationRecord};
pub use impact::{ChangeImpact, ImpactAnalysis, ImpactClassifier};
pub use scope::InvalidationScope;
pub use selective::{
    EvictionFailure, InvalidationOptions, InvalidationOutcome, InvalidationPlan, InvalidationStats,
    RollbackReport, SelectiveInvalidation,
};
pub use strategy::{InvalidationStrategy, StrategyParams};
