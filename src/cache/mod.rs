//! The parse-result cache: keys, hashes, storage and the facade on top.

mod entry;
mod error;
pub mod hasher;
pub mod key;
mod manager;
mod store;

pub use entry::{CacheEntry, EntryInfo, QuarantinedEntry};
pub use error::{StoreError, StoreResult};
pub use hasher::ContentHasher;
pub use key::{CacheKey, CacheKeyGenerator};
pub use manager::AstCache;
pub use store::{CacheStats, CacheStore};
