//! Per-root watch state: content snapshots and debounced classification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use ignore::WalkBuilder;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};

use super::debouncer::Debouncer;
use super::filter::WatchFilter;
use crate::change::ChangeEvent;

#[derive(Debug)]
pub(crate) struct RootState {
    root: PathBuf,
    filter: WatchFilter,
    debouncer: Debouncer<String>,
    /// Last known content per relative path; `None` when too large to keep.
    snapshots: HashMap<String, Option<String>>,
    snapshot_max_bytes: u64,
}

impl RootState {
    pub fn new(root: PathBuf, filter: WatchFilter, debounce_ms: u64, snapshot_max_bytes: u64) -> Self {
        Self {
            root,
            filter,
            debouncer: Debouncer::from_millis(debounce_ms),
            snapshots: HashMap::new(),
            snapshot_max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn debouncer(&self) -> &Debouncer<String> {
        &self.debouncer
    }

    /// Cancel every pending debounce entry.
    pub fn clear_pending(&mut self) {
        self.debouncer.clear();
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Record the current content of every watched file under the root.
    pub fn snapshot_all(&mut self) {
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(false)
            .git_exclude(false)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();
        for entry in walker.flatten() {
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if let Some(relative) = self.filter.classify(entry.path(), &self.root) {
                let content = self.read(entry.path());
                self.snapshots.insert(relative, content);
            }
        }
        crate::debug_event!(
            "watcher",
            "snapshot",
            "{}: {} files",
            self.root.display(),
            self.snapshots.len()
        );
    }

    fn read(&self, path: &Path) -> Option<String> {
        let metadata = std::fs::metadata(path).ok()?;
        if metadata.len() > self.snapshot_max_bytes {
            return None;
        }
        std::fs::read_to_string(path).ok()
    }

    /// Feed one raw notify event. Complete renames are returned right away;
    /// everything else is debounced.
    pub fn record(&mut self, event: &Event, now: Instant) -> Vec<ChangeEvent> {
        if event.paths.iter().any(|p| WatchFilter::is_gitignore(p)) {
            self.filter.reload_gitignores();
        }

        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                let from = self.filter.classify(&event.paths[0], &self.root);
                let to = self.filter.classify(&event.paths[1], &self.root);
                match (from, to) {
                    (Some(from), Some(to)) => return vec![self.rename(from, to)],
                    // Moved out of view: surfaces as a delete.
                    (Some(from), None) => self.debouncer.record_at(from, now),
                    // Moved into view: surfaces as an add.
                    (None, Some(to)) => self.debouncer.record_at(to, now),
                    (None, None) => {}
                }
            }
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                for path in &event.paths {
                    match self.filter.classify(path, &self.root) {
                        Some(relative) => self.debouncer.record_at(relative, now),
                        None => {
                            crate::debug_event!("watcher", "filtered", "{}", path.display());
                        }
                    }
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
        Vec::new()
    }

    fn rename(&mut self, from: String, to: String) -> ChangeEvent {
        self.debouncer.remove(&from);
        self.debouncer.remove(&to);
        self.snapshots.remove(&from);
        let to_path = self.root.join(&to);
        let content = self.read(&to_path);
        self.snapshots.insert(to, content.clone());
        ChangeEvent::renamed(self.root.join(from), to_path, content)
    }

    /// Classify every debounced path that has gone quiet.
    ///
    /// Existence on disk and the snapshot decide between add, modify and
    /// delete. A rewrite with identical bytes produces nothing.
    pub fn take_ready(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let mut changes = Vec::new();
        for relative in self.debouncer.take_ready_at(now) {
            let path = self.root.join(&relative);
            let exists = path.is_file();
            match (exists, self.snapshots.contains_key(&relative)) {
                (true, false) => {
                    let content = self.read(&path);
                    self.snapshots.insert(relative, content.clone());
                    changes.push(ChangeEvent::added(path, content));
                }
                (true, true) => {
                    let content = self.read(&path);
                    let previous = self.snapshots.insert(relative, content.clone()).flatten();
                    if previous.is_some() && previous == content {
                        crate::debug_event!("watcher", "unchanged", "{}", path.display());
                        continue;
                    }
                    changes.push(ChangeEvent::modified(path, previous, content));
                }
                (false, true) => {
                    let previous = self.snapshots.remove(&relative).flatten();
                    changes.push(ChangeEvent::deleted(path, previous));
                }
                // Created and removed within one debounce window.
                (false, false) => {}
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKeyGenerator;
    use crate::change::ChangeType;
    use crate::language::Language;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn state(dir: &TempDir) -> RootState {
        let keys = CacheKeyGenerator::new(
            [Language::JavaScript],
            &["node_modules/**".to_string()],
            false,
        );
        let mut state = RootState::new(
            dir.path().to_path_buf(),
            WatchFilter::new(Arc::new(keys)),
            100,
            1024,
        );
        state.snapshot_all();
        state
    }

    fn event(kind: EventKind, paths: &[PathBuf]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(path.clone());
        }
        event
    }

    fn modify(path: &Path) -> Event {
        event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &[path.to_path_buf()],
        )
    }

    #[test]
    fn test_rapid_saves_yield_one_change() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.js");
        std::fs::write(&file, "export const a = 0;\n").unwrap();
        let mut state = state(&dir);

        let start = Instant::now();
        for i in 1..=5u64 {
            std::fs::write(&file, format!("export const a = {i};\n")).unwrap();
            assert!(state.record(&modify(&file), start + Duration::from_millis(i * 10)).is_empty());
        }

        assert!(state.take_ready(start + Duration::from_millis(100)).is_empty());
        let changes = state.take_ready(start + Duration::from_millis(200));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Modify);
        assert_eq!(changes[0].old_content.as_deref(), Some("export const a = 0;\n"));
        assert_eq!(changes[0].new_content.as_deref(), Some("export const a = 5;\n"));
    }

    #[test]
    fn test_excluded_and_unsupported_are_silent() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        let excluded = dir.path().join("node_modules/x.js");
        let unsupported = dir.path().join("notes.txt");
        std::fs::write(&excluded, "x").unwrap();
        std::fs::write(&unsupported, "x").unwrap();
        let mut state = state(&dir);
        assert_eq!(state.snapshot_count(), 0);

        let now = Instant::now();
        state.record(&modify(&excluded), now);
        state.record(&modify(&unsupported), now);
        assert!(!state.debouncer().has_pending());
    }

    #[test]
    fn test_add_and_delete() {
        let dir = TempDir::new().unwrap();
        let mut state = state(&dir);
        let file = dir.path().join("b.js");
        let now = Instant::now();

        std::fs::write(&file, "let b;\n").unwrap();
        state.record(&event(EventKind::Create(CreateKind::File), &[file.clone()]), now);
        let added = state.take_ready(now + Duration::from_millis(150));
        assert_eq!(added[0].change_type, ChangeType::Add);

        std::fs::remove_file(&file).unwrap();
        state.record(&event(EventKind::Remove(RemoveKind::File), &[file.clone()]), now);
        let deleted = state.take_ready(now + Duration::from_millis(150));
        assert_eq!(deleted[0].change_type, ChangeType::Delete);
        assert_eq!(deleted[0].old_content.as_deref(), Some("let b;\n"));
    }

    #[test]
    fn test_transient_file_and_identical_rewrite() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("c.js");
        std::fs::write(&file, "same\n").unwrap();
        let mut state = state(&dir);
        let now = Instant::now();

        // Rewritten with identical bytes.
        state.record(&modify(&file), now);
        assert!(state.take_ready(now + Duration::from_millis(150)).is_empty());

        // Created and removed before the debounce fired.
        let temp = dir.path().join("tmp.js");
        state.record(&event(EventKind::Create(CreateKind::File), &[temp]), now);
        assert!(state.take_ready(now + Duration::from_millis(150)).is_empty());
    }

    #[test]
    fn test_rename_is_immediate() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("old.js");
        let to = dir.path().join("new.js");
        std::fs::write(&from, "export {};\n").unwrap();
        let mut state = state(&dir);
        std::fs::rename(&from, &to).unwrap();

        let changes = state.record(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &[from.clone(), to.clone()],
            ),
            Instant::now(),
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].file_path, to);
        assert_eq!(changes[0].change_type, ChangeType::Rename { from });
        assert!(!state.debouncer().has_pending());
    }

    #[test]
    fn test_clear_pending() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("d.js");
        std::fs::write(&file, "x\n").unwrap();
        let mut state = state(&dir);
        state.record(&modify(&file), Instant::now());
        state.clear_pending();
        assert!(state.take_ready(Instant::now() + Duration::from_secs(1)).is_empty());
    }
}
