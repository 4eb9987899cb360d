//! Command implementations for the CLI.
//!
//! Each command lives in its own module. [`Workspace`] wires the cache
//! components together from the loaded settings.

pub mod clean;
pub mod graph;
pub mod init;
pub mod invalidate;
pub mod key;
pub mod stats;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cache::{CacheKeyGenerator, CacheStore, ContentHasher};
use crate::config::Settings;
use crate::dependency::{BuildStats, DependencyTracker, SharedDependencyTracker, TrackerOptions};
use crate::events::EventBus;
use crate::invalidation::SelectiveInvalidation;
use crate::parsing::{AstParser, SurfaceParser};

/// Everything a command needs, built once from settings.
pub struct Workspace {
    pub settings: Settings,
    pub root: PathBuf,
    pub branch: String,
    pub keys: Arc<CacheKeyGenerator>,
    pub hasher: Arc<ContentHasher>,
    pub store: Arc<CacheStore>,
    pub parser: Arc<dyn AstParser>,
}

impl Workspace {
    pub fn open(settings: Settings, branch: Option<String>) -> Result<Self> {
        let root = settings.project_root();
        let root = root.canonicalize().unwrap_or(root);
        let cache_root = settings.cache.resolve_root(&root);
        let store = CacheStore::open(&cache_root)
            .with_context(|| format!("opening cache at {}", cache_root.display()))?;
        let branch = branch.unwrap_or_else(|| current_branch(&root));

        Ok(Self {
            keys: Arc::new(CacheKeyGenerator::from_config(&settings.cache)),
            hasher: Arc::new(ContentHasher::new()),
            store: Arc::new(store),
            parser: Arc::new(SurfaceParser::new()),
            settings,
            root,
            branch,
        })
    }

    pub fn cache_root(&self) -> PathBuf {
        self.settings.cache.resolve_root(&self.root)
    }

    /// Scan the project and build the dependency graph.
    pub fn scan(&self) -> Result<(SharedDependencyTracker, BuildStats)> {
        let mut tracker = DependencyTracker::new(
            &self.root,
            TrackerOptions::from(&self.settings.invalidation),
        );
        let stats = tracker
            .scan_project(self.parser.as_ref(), &self.keys)
            .with_context(|| format!("scanning {}", self.root.display()))?;
        Ok((tracker.into_shared(), stats))
    }

    pub fn engine(
        &self,
        tracker: Option<SharedDependencyTracker>,
        events: Option<EventBus>,
    ) -> SelectiveInvalidation {
        let engine = SelectiveInvalidation::new(
            &self.root,
            Arc::clone(&self.store),
            tracker,
            Arc::clone(&self.hasher),
            Arc::clone(&self.parser),
            &self.settings.invalidation,
        );
        match events {
            Some(events) => engine.with_events(events),
            None => engine,
        }
    }

    /// `path` made absolute against the current directory.
    pub fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let joined = std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| self.root.join(path));
        joined.canonicalize().unwrap_or(joined)
    }
}

/// Branch checked out in `root`, or `default` outside a git repository.
pub fn current_branch(root: &Path) -> String {
    let head = root
        .ancestors()
        .map(|dir| dir.join(".git").join("HEAD"))
        .find(|path| path.is_file())
        .and_then(|path| std::fs::read_to_string(path).ok());

    match head {
        Some(head) => match head.trim().strip_prefix("ref: refs/heads/") {
            Some(branch) => branch.to_string(),
            // Detached HEAD: use the abbreviated commit.
            None => head.trim().chars().take(8).collect(),
        },
        None => "default".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_current_branch() {
        let dir = TempDir::new().unwrap();
        assert_eq!(current_branch(dir.path()), "default");

        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/feature/x\n").unwrap();
        assert_eq!(current_branch(dir.path()), "feature/x");

        std::fs::write(dir.path().join(".git/HEAD"), "0123456789abcdef\n").unwrap();
        assert_eq!(current_branch(dir.path()), "01234567");
    }

    #[test]
    fn test_workspace_scan() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.js"), "import { b } from './b';\n").unwrap();
        std::fs::write(dir.path().join("src/b.js"), "export const b = 1;\n").unwrap();

        let settings = Settings {
            workspace_root: Some(dir.path().to_path_buf()),
            ..Settings::default()
        };
        let workspace = Workspace::open(settings, Some("main".into())).unwrap();
        assert!(workspace.cache_root().is_dir());

        let (tracker, stats) = workspace.scan().unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(
            tracker.read().get_dependents(Path::new("src/b.js")),
            vec![PathBuf::from("src/a.js")]
        );
    }
}
