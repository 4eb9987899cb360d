//! Scheduled garbage collection for the cache store.
//!
//! A sweep runs in three passes: entries older than `max_age` go first,
//! then the least recently accessed entries until the store fits in
//! `max_size_bytes`, then quarantined entries past their grace period.
//! Collected entries are evicted for good; they never enter quarantine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStore, StoreResult};
use crate::config::CacheConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    /// Keys removed for exceeding the maximum age.
    pub expired: Vec<String>,
    /// Keys removed by the size sweep, least recently used first.
    pub lru_evicted: Vec<String>,
    pub quarantine_purged: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub duration_ms: u64,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.expired.len() + self.lru_evicted.len()
    }
}

struct Schedule {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct CacheCleaner {
    store: Arc<CacheStore>,
    max_age: Duration,
    max_size_bytes: u64,
    interval: Duration,
    quarantine_grace: Duration,
    schedule: Mutex<Option<Schedule>>,
}

impl CacheCleaner {
    pub fn new(store: Arc<CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            max_age: config.max_age(),
            max_size_bytes: config.max_size_bytes(),
            interval: config.cleanup_interval(),
            quarantine_grace: config.quarantine_grace(),
            schedule: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn run_once(&self) -> StoreResult<CleanupReport> {
        self.run_at(Utc::now())
    }

    /// Sweep as if the current time were `now`.
    pub fn run_at(&self, now: DateTime<Utc>) -> StoreResult<CleanupReport> {
        let started = Instant::now();
        let mut report = CleanupReport {
            bytes_before: self.store.total_bytes(),
            ..CleanupReport::default()
        };

        let max_age = TimeDelta::from_std(self.max_age).unwrap_or(TimeDelta::MAX);
        let mut survivors = Vec::new();
        for info in self.store.entry_infos() {
            if now.signed_duration_since(info.stored_at) > max_age {
                if self.store.evict_key(&info.key)?.is_some() {
                    report.expired.push(info.key);
                }
            } else {
                survivors.push(info);
            }
        }

        if self.store.total_bytes() > self.max_size_bytes {
            survivors.sort_by(|a, b| {
                a.last_accessed
                    .cmp(&b.last_accessed)
                    .then_with(|| a.stored_at.cmp(&b.stored_at))
                    .then_with(|| a.key.cmp(&b.key))
            });
            for info in survivors {
                if self.store.total_bytes() <= self.max_size_bytes {
                    break;
                }
                if self.store.evict_key(&info.key)?.is_some() {
                    report.lru_evicted.push(info.key);
                }
            }
        }

        let grace = TimeDelta::from_std(self.quarantine_grace).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(grace).unwrap_or(DateTime::<Utc>::MIN_UTC);
        report.quarantine_purged = self.store.purge_quarantine(cutoff);

        report.bytes_after = self.store.total_bytes();
        report.duration_ms = started.elapsed().as_millis() as u64;

        if report.removed() > 0 || report.quarantine_purged > 0 {
            crate::log_event!(
                "cleaner",
                "swept",
                "{} expired, {} evicted for size, {} purged from quarantine, {} -> {} bytes",
                report.expired.len(),
                report.lru_evicted.len(),
                report.quarantine_purged,
                report.bytes_before,
                report.bytes_after
            );
        } else {
            crate::debug_event!("cleaner", "nothing to collect");
        }
        Ok(report)
    }

    /// Run a sweep every interval on the current tokio runtime.
    ///
    /// Returns `false` when no runtime is available or a schedule is
    /// already running.
    pub fn start(&self) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("[cleaner] no tokio runtime, scheduled cleanup disabled");
            return false;
        };
        let mut schedule = self.schedule.lock();
        if schedule.as_ref().is_some_and(|s| !s.task.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let task = runtime.spawn(sweep_loop(
            Arc::clone(&self.store),
            SweepLimits {
                max_age: self.max_age,
                max_size_bytes: self.max_size_bytes,
                interval: self.interval,
                quarantine_grace: self.quarantine_grace,
            },
            cancel.clone(),
        ));
        *schedule = Some(Schedule { cancel, task });
        crate::log_event!("cleaner", "scheduled", "every {}s", self.interval.as_secs());
        true
    }

    /// Stop the schedule. No sweep starts after this returns.
    pub fn stop(&self) {
        if let Some(schedule) = self.schedule.lock().take() {
            schedule.cancel.cancel();
            schedule.task.abort();
            crate::debug_event!("cleaner", "stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.schedule
            .lock()
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }
}

impl Drop for CacheCleaner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Clone, Copy)]
struct SweepLimits {
    max_age: Duration,
    max_size_bytes: u64,
    interval: Duration,
    quarantine_grace: Duration,
}

async fn sweep_loop(store: Arc<CacheStore>, limits: SweepLimits, cancel: CancellationToken) {
    let cleaner = CacheCleaner {
        store,
        max_age: limits.max_age,
        max_size_bytes: limits.max_size_bytes,
        interval: limits.interval,
        quarantine_grace: limits.quarantine_grace,
        schedule: Mutex::new(None),
    };
    let mut ticker = tokio::time::interval(limits.interval);
    // The first tick completes immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = cleaner.run_once() {
                    tracing::error!("[cleaner] sweep failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, CacheKey};
    use crate::language::Language;
    use crate::parsing::AstSummary;

    fn config(max_age_secs: u64, max_size_mb: u64) -> CacheConfig {
        CacheConfig {
            max_age_secs,
            max_size_mb,
            ..CacheConfig::default()
        }
    }

    fn key(path: &str) -> CacheKey {
        CacheKey::new(Language::JavaScript, "main", "abcd1234", path)
    }

    fn put(store: &CacheStore, path: &str, stored_at: DateTime<Utc>) -> String {
        let key = key(path);
        let entry = CacheEntry::stored_at(key.clone(), AstSummary::default(), "h", stored_at);
        store.put_entry(entry).unwrap();
        key.to_string()
    }

    #[test]
    fn test_expired_entries_are_collected() {
        let store = Arc::new(CacheStore::in_memory());
        let now = Utc::now();
        let old = put(&store, "old.js", now - TimeDelta::hours(2));
        let fresh = put(&store, "fresh.js", now - TimeDelta::minutes(30));

        let cleaner = CacheCleaner::new(store.clone(), &config(3600, 100));
        let report = cleaner.run_at(now).unwrap();

        assert_eq!(report.expired, vec![old.clone()]);
        assert!(report.lru_evicted.is_empty());
        assert!(!store.contains(&old));
        assert!(store.contains(&fresh));
        // Collected entries are not restorable.
        assert_eq!(store.stats().quarantined, 0);
    }

    #[test]
    fn test_size_sweep_evicts_least_recently_used() {
        let store = Arc::new(CacheStore::in_memory());
        let now = Utc::now();
        let a = put(&store, "a.js", now - TimeDelta::minutes(3));
        let b = put(&store, "b.js", now - TimeDelta::minutes(2));
        let c = put(&store, "c.js", now - TimeDelta::minutes(1));
        // Touch the oldest so it becomes the most recently used.
        assert!(store.get_str(&a).is_some());

        let mut cleaner = CacheCleaner::new(store.clone(), &config(3600, 100));
        let per_entry = store.total_bytes() / 3;
        cleaner.max_size_bytes = per_entry * 2;
        let report = cleaner.run_at(now).unwrap();

        assert_eq!(report.lru_evicted, vec![b.clone()]);
        assert!(store.contains(&a));
        assert!(store.contains(&c));
        assert!(report.bytes_after <= per_entry * 2);
    }

    #[test]
    fn test_quarantine_purged_after_grace() {
        let store = Arc::new(CacheStore::in_memory());
        let key = put(&store, "q.js", Utc::now());
        store.remove_key(&key).unwrap();
        assert_eq!(store.stats().quarantined, 1);

        let cleaner = CacheCleaner::new(store.clone(), &config(3600, 100));
        assert_eq!(cleaner.run_at(Utc::now()).unwrap().quarantine_purged, 0);

        let later = Utc::now() + TimeDelta::seconds(301);
        assert_eq!(cleaner.run_at(later).unwrap().quarantine_purged, 1);
        assert_eq!(store.stats().quarantined, 0);
    }

    #[test]
    fn test_start_requires_runtime() {
        let cleaner = CacheCleaner::new(Arc::new(CacheStore::in_memory()), &CacheConfig::default());
        assert!(!cleaner.start());
        assert!(!cleaner.is_running());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let cleaner = CacheCleaner::new(Arc::new(CacheStore::in_memory()), &CacheConfig::default());
        assert_eq!(cleaner.interval(), Duration::from_secs(3600));
        assert!(cleaner.start());
        assert!(cleaner.is_running());
        assert!(!cleaner.start());

        cleaner.stop();
        assert!(!cleaner.is_running());
    }
}
