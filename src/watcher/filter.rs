use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::cache::CacheKeyGenerator;

/// Decides which raw paths under a root produce events at all.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    keys: Arc<CacheKeyGenerator>,
    ignored_dirs: Vec<PathBuf>,
}

impl WatchFilter {
    pub fn new(keys: Arc<CacheKeyGenerator>) -> Self {
        Self {
            keys,
            ignored_dirs: Vec::new(),
        }
    }

    /// Never report anything below `dir` (e.g. the cache directory).
    pub fn ignore_dir(&mut self, dir: impl Into<PathBuf>) {
        self.ignored_dirs.push(dir.into());
    }

    /// Root-relative key for `path`, or `None` when the file is excluded,
    /// gitignored, unsupported or inside an ignored directory.
    pub fn classify(&self, path: &Path, root: &Path) -> Option<String> {
        if self.ignored_dirs.iter().any(|dir| path.starts_with(dir)) {
            return None;
        }
        let relative = path.strip_prefix(root).ok()?;
        if relative
            .components()
            .any(|c| matches!(c, Component::Normal(name) if name == ".git"))
        {
            return None;
        }
        self.keys.classify(path, root).map(|(_, relative)| relative)
    }

    /// Whether `path` is a `.gitignore` whose edits change classification.
    pub fn is_gitignore(path: &Path) -> bool {
        path.file_name().is_some_and(|name| name == ".gitignore")
    }

    pub fn reload_gitignores(&self) {
        self.keys.reload_gitignores();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;

    fn filter() -> WatchFilter {
        let keys = CacheKeyGenerator::new(
            [Language::JavaScript, Language::Python],
            &["dist/**".to_string()],
            false,
        );
        let mut filter = WatchFilter::new(Arc::new(keys));
        filter.ignore_dir("/p/.cache");
        filter
    }

    #[test]
    fn test_classify() {
        let f = filter();
        let root = Path::new("/p");
        assert_eq!(f.classify(Path::new("/p/src/a.js"), root).as_deref(), Some("src/a.js"));
        assert!(f.classify(Path::new("/p/dist/a.js"), root).is_none());
        assert!(f.classify(Path::new("/p/src/a.go"), root).is_none());
        assert!(f.classify(Path::new("/p/.git/hooks/x.py"), root).is_none());
        assert!(f.classify(Path::new("/p/.cache/javascript/x.js"), root).is_none());
        assert!(f.classify(Path::new("/elsewhere/a.js"), root).is_none());
    }

    #[test]
    fn test_is_gitignore() {
        assert!(WatchFilter::is_gitignore(Path::new("/p/.gitignore")));
        assert!(!WatchFilter::is_gitignore(Path::new("/p/gitignore.py")));
    }
}
