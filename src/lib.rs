//! Content-addressed AST cache with dependency-aware invalidation.
//!
//! Parse results are cached under keys derived from language, branch,
//! content hash and project-relative path. When files change, the
//! dependency graph decides how far an invalidation has to reach, and a
//! file watcher feeds changes through a windowed batch processor.

pub mod batch;
pub mod cache;
pub mod change;
pub mod cleaner;
pub mod cli;
pub mod config;
pub mod dependency;
pub mod events;
pub mod invalidation;
pub mod language;
pub mod logging;
pub mod parsing;
pub mod watcher;

pub use batch::{BatchInvalidation, BatchReport, BatchStatus, BatchStrategy};
pub use cache::{AstCache, CacheEntry, CacheKey, CacheKeyGenerator, CacheStore, ContentHasher};
pub use change::{ChangeEvent, ChangeSink, ChangeType};
pub use cleaner::{CacheCleaner, CleanupReport};
pub use config::Settings;
pub use dependency::{DependencyTracker, SharedDependencyTracker};
pub use events::{CacheEvent, EventBus};
pub use invalidation::{
    ChangeImpact, InvalidationOptions, InvalidationStrategy, SelectiveInvalidation,
};
pub use language::Language;
pub use parsing::{AstParser, AstSummary, ParseOutcome, SurfaceParser};
pub use watcher::FileWatcher;
