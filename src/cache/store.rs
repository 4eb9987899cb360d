//! Key/value persistence of parse results.
//!
//! Entries live in a concurrent in-memory map that is mirrored to one JSON
//! file per key under the cache root. Writes to the same key are serialized
//! through a per-key lock; different keys never contend. Reads are served
//! from memory, so a `get` after `set` always sees the new value.
//!
//! Invalidated entries are not dropped outright. They move to a quarantine
//! where they stay restorable until [`CacheStore::purge_quarantine`] runs.
//! Separate processes writing the same cache root are last-write-wins.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use walkdir::WalkDir;

use super::entry::{CacheEntry, EntryInfo, QuarantinedEntry};
use super::error::{StoreError, StoreResult};
use super::key::{CacheKey, relative_path, sanitize_branch};
use crate::language::Language;
use crate::parsing::AstSummary;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub quarantined: usize,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
}

#[derive(Debug)]
pub struct CacheStore {
    /// `None` keeps everything in memory.
    root: Option<PathBuf>,
    entries: DashMap<String, CacheEntry>,
    last_accessed: DashMap<String, DateTime<Utc>>,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
    quarantine: DashMap<String, QuarantinedEntry>,
    counters: Counters,
}

impl CacheStore {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            entries: DashMap::new(),
            last_accessed: DashMap::new(),
            write_locks: DashMap::new(),
            quarantine: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Open (or create) a store rooted at `root`, loading existing entries.
    ///
    /// Entry files that cannot be read or parsed are skipped with a warning.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut store = Self::in_memory();
        let mut skipped = 0usize;
        for dirent in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
            let path = dirent.path();
            if !dirent.file_type().is_file() || path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            match load_entry(path) {
                Ok(entry) => {
                    let key = entry.key.to_string();
                    store.last_accessed.insert(key.clone(), entry.stored_at);
                    store.entries.insert(key, entry);
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!("[store] skipping corrupt entry {}: {e}", path.display());
                }
            }
        }

        crate::debug_event!(
            "store",
            "opened",
            "{} entries from {} ({skipped} skipped)",
            store.entries.len(),
            root.display()
        );
        store.root = Some(root);
        Ok(store)
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up an entry, recording a hit or miss.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.get_str(&key.to_string())
    }

    pub fn get_str(&self, key: &str) -> Option<CacheEntry> {
        match self.entries.get(key) {
            Some(entry) => {
                let entry = entry.value().clone();
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.last_accessed.insert(key.to_string(), Utc::now());
                Some(entry)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up without touching statistics or access times.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Store `ast` under `key`, replacing any previous entry.
    pub fn set(
        &self,
        key: &CacheKey,
        ast: AstSummary,
        source_hash: impl Into<String>,
    ) -> StoreResult<CacheEntry> {
        let entry = CacheEntry::new(key.clone(), ast, source_hash);
        self.put_entry(entry.clone())?;
        Ok(entry)
    }

    /// Write a fully formed entry.
    pub fn put_entry(&self, entry: CacheEntry) -> StoreResult<()> {
        let key = entry.key.to_string();
        self.with_write_lock(&key, || self.write_entry(key.clone(), entry))
    }

    /// Remove one entry, moving it to quarantine. Absent keys are a no-op.
    pub fn remove_key(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        self.with_write_lock(key, || {
            let removed = self.take(key)?;
            if let Some(entry) = &removed {
                self.quarantine.insert(
                    key.to_string(),
                    QuarantinedEntry {
                        entry: entry.clone(),
                        evicted_at: Utc::now(),
                    },
                );
                self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            }
            Ok(removed)
        })
    }

    /// Remove one entry for good, bypassing quarantine.
    pub fn evict_key(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        self.with_write_lock(key, || self.take(key))
    }

    /// Run `f` holding the writer lock of `key`, then drop the lock from
    /// the table once no other writer holds it.
    fn with_write_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .write_locks
            .entry(key.to_string())
            .or_default()
            .value()
            .clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.write_locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Caller holds the writer lock of `key`.
    fn write_entry(&self, key: String, entry: CacheEntry) -> StoreResult<()> {
        self.write_to_disk(&entry)?;
        self.last_accessed.insert(key.clone(), entry.stored_at);
        self.entries.insert(key, entry);
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Caller holds the writer lock of `key`. The file goes first, so an
    /// entry whose file cannot be removed stays cached.
    fn take(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let Some(storage_key) = self.entries.get(key).map(|e| e.key.clone()) else {
            return Ok(None);
        };
        if let Some(root) = &self.root {
            remove_file_if_present(&storage_key.storage_path(root))?;
        }
        let removed = self.entries.remove(key).map(|(_, entry)| entry);
        self.last_accessed.remove(key);
        Ok(removed)
    }

    /// Every key cached for one source file, optionally restricted to a branch.
    pub fn keys_for_file(
        &self,
        language: Language,
        relative_path: &str,
        branch: Option<&str>,
    ) -> Vec<String> {
        let branch = branch.map(sanitize_branch);
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| {
                let key = &e.value().key;
                key.is_for_file(language, relative_path)
                    && branch.as_ref().is_none_or(|b| &key.branch == b)
            })
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remove every entry of `file_path` across branches, or on one branch.
    ///
    /// Returns the removed keys.
    pub fn invalidate_file(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: Option<&str>,
    ) -> StoreResult<Vec<String>> {
        match self.try_invalidate_file(file_path, project_root, branch) {
            (removed, None) => Ok(removed),
            (_, Some(e)) => Err(e),
        }
    }

    /// Like [`invalidate_file`](Self::invalidate_file), but keeps going past
    /// a failing key and reports the keys removed alongside the first error.
    pub fn try_invalidate_file(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: Option<&str>,
    ) -> (Vec<String>, Option<StoreError>) {
        let Some(relative) = relative_path(file_path, project_root) else {
            let error = StoreError::OutsideRoot {
                path: file_path.to_path_buf(),
                root: project_root.to_path_buf(),
            };
            return (Vec::new(), Some(error));
        };
        let Some(language) = Language::from_path(Path::new(&relative)) else {
            return (Vec::new(), None);
        };

        let keys = self.keys_for_file(language, &relative, branch);
        let mut removed = Vec::with_capacity(keys.len());
        let mut error = None;
        for key in keys {
            match self.remove_key(&key) {
                Ok(Some(_)) => removed.push(key),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("[store] failed to evict {key}: {e}");
                    error.get_or_insert(e);
                }
            }
        }
        if !removed.is_empty() {
            crate::debug_event!("store", "invalidated", "{relative}: {} entries", removed.len());
        }
        (removed, error)
    }

    /// Quarantine every entry. Returns the removed keys.
    pub fn clear(&self) -> StoreResult<Vec<String>> {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if self.remove_key(&key)?.is_some() {
                removed.push(key);
            }
        }
        Ok(removed)
    }

    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Age and access metadata for every entry.
    pub fn entry_infos(&self) -> Vec<EntryInfo> {
        self.entries
            .iter()
            .map(|e| {
                let entry = e.value();
                let last_accessed = self
                    .last_accessed
                    .get(e.key())
                    .map(|t| *t.value())
                    .unwrap_or(entry.stored_at);
                EntryInfo {
                    key: e.key().clone(),
                    stored_at: entry.stored_at,
                    last_accessed,
                    size: entry.size,
                }
            })
            .collect()
    }

    pub fn last_accessed(&self, key: &str) -> Option<DateTime<Utc>> {
        self.last_accessed.get(key).map(|t| *t.value())
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.value().size).sum()
    }

    pub fn is_quarantined(&self, key: &str) -> bool {
        self.quarantine.contains_key(key)
    }

    /// Bring a quarantined entry back.
    ///
    /// Returns `false` when the key is not quarantined or has been
    /// re-occupied by a newer write since it was evicted.
    pub fn restore(&self, key: &str) -> StoreResult<bool> {
        self.with_write_lock(key, || {
            if self.entries.contains_key(key) {
                self.quarantine.remove(key);
                return Ok(false);
            }
            let Some((_, quarantined)) = self.quarantine.remove(key) else {
                return Ok(false);
            };
            if let Err(e) = self.write_entry(key.to_string(), quarantined.entry.clone()) {
                self.quarantine.insert(key.to_string(), quarantined);
                return Err(e);
            }
            Ok(true)
        })
    }

    /// Drop quarantined entries evicted before `cutoff`.
    pub fn purge_quarantine(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.quarantine.len();
        self.quarantine.retain(|_, q| q.evicted_at >= cutoff);
        before - self.quarantine.len()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries: self.entries.len(),
            total_bytes: self.total_bytes(),
            hits,
            misses,
            writes: self.counters.writes.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            quarantined: self.quarantine.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    fn write_to_disk(&self, entry: &CacheEntry) -> StoreResult<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let path = entry.key.storage_path(root);
        let parent = path.parent().unwrap_or(root);
        std::fs::create_dir_all(parent)?;

        let json = serde_json::to_vec_pretty(entry)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&json)?;
        tmp.persist(&path).map_err(|e| StoreError::Persist {
            key: entry.key.to_string(),
            reason: e.error.to_string(),
        })?;
        Ok(())
    }
}

fn load_entry(path: &Path) -> StoreResult<CacheEntry> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn remove_file_if_present(path: &Path) -> StoreResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
