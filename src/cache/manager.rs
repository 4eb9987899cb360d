//! Facade tying key generation, hashing and storage together.

use std::path::Path;
use std::sync::Arc;

use super::error::StoreResult;
use super::hasher::ContentHasher;
use super::key::{CacheKey, CacheKeyGenerator};
use super::store::CacheStore;
use crate::config::ContextInclusionConfig;
use crate::parsing::{AstParser, AstSummary};

/// Entry point for callers that want "the AST of this file".
///
/// When the cache is disabled every lookup misses and every store is
/// skipped; parsing still works through [`AstCache::get_or_parse`].
#[derive(Debug, Clone)]
pub struct AstCache {
    enabled: bool,
    keys: Arc<CacheKeyGenerator>,
    hasher: Arc<ContentHasher>,
    store: Arc<CacheStore>,
    context: ContextInclusionConfig,
}

impl AstCache {
    pub fn new(
        enabled: bool,
        keys: Arc<CacheKeyGenerator>,
        hasher: Arc<ContentHasher>,
        store: Arc<CacheStore>,
        context: ContextInclusionConfig,
    ) -> Self {
        Self {
            enabled,
            keys,
            hasher,
            store,
            context,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn keys(&self) -> &Arc<CacheKeyGenerator> {
        &self.keys
    }

    pub fn hasher(&self) -> &Arc<ContentHasher> {
        &self.hasher
    }

    /// Content-addressed key for `content` as the current text of `file_path`.
    pub fn key_for(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
        content: &str,
    ) -> Option<CacheKey> {
        let (language, relative) = self.keys.classify(file_path, project_root)?;
        self.keys
            .generate_key_from_content(content, language, &relative, branch, None)
    }

    pub fn get_cached_ast(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
        content: &str,
    ) -> Option<AstSummary> {
        if !self.enabled {
            return None;
        }
        let key = self.key_for(file_path, project_root, branch, content)?;
        self.store.get(&key).map(|entry| entry.ast)
    }

    /// Store `ast` for `content`. Returns the key, or `None` when the file
    /// is not cacheable or the cache is disabled.
    pub fn set_cached_ast(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
        content: &str,
        ast: AstSummary,
    ) -> StoreResult<Option<CacheKey>> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(key) = self.key_for(file_path, project_root, branch, content) else {
            return Ok(None);
        };
        let source_hash = self
            .hasher
            .generate_hash(file_path, content, key.language);
        self.store.set(&key, ast, source_hash)?;
        Ok(Some(key))
    }

    /// Cached AST for the file on disk, parsing and storing it on a miss.
    ///
    /// Returns `None` for files that are not cacheable or fail to parse.
    pub fn get_or_parse(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
        parser: &dyn AstParser,
    ) -> StoreResult<Option<AstSummary>> {
        let absolute = if file_path.is_absolute() {
            file_path.to_path_buf()
        } else {
            project_root.join(file_path)
        };
        if self.keys.classify(&absolute, project_root).is_none() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&absolute)?;
        if let Some(ast) = self.get_cached_ast(&absolute, project_root, branch, &content) {
            return Ok(Some(ast));
        }

        let outcome = parser.parse_file(&absolute, &content);
        let Some(ast) = outcome.clone().into_ast() else {
            tracing::debug!(
                "[cache] parse failed for {}: {}",
                absolute.display(),
                outcome.error.unwrap_or_default()
            );
            return Ok(None);
        };

        self.set_cached_ast(&absolute, project_root, branch, &content, ast.clone())?;
        Ok(Some(ast))
    }

    /// AST trimmed for inclusion in a context window.
    ///
    /// Files whose complexity exceeds `max_complexity_score` are left out
    /// entirely; otherwise at most `max_functions` functions are kept.
    pub fn get_for_context(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
        parser: &dyn AstParser,
    ) -> StoreResult<Option<AstSummary>> {
        let Some(mut ast) = self.get_or_parse(file_path, project_root, branch, parser)? else {
            return Ok(None);
        };
        if ast.complexity > self.context.max_complexity_score {
            crate::debug_event!(
                "cache",
                "context-skip",
                "{} complexity {} > {}",
                file_path.display(),
                ast.complexity,
                self.context.max_complexity_score
            );
            return Ok(None);
        }
        ast.functions.truncate(self.context.max_functions);
        Ok(Some(ast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::parsing::{ParseOutcome, SurfaceParser};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingParser(AtomicUsize);

    impl AstParser for CountingParser {
        fn parse_file(&self, path: &Path, content: &str) -> ParseOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            SurfaceParser::new().parse_file(path, content)
        }
    }

    fn cache(enabled: bool, context: ContextInclusionConfig) -> AstCache {
        AstCache::new(
            enabled,
            Arc::new(CacheKeyGenerator::new(Language::ALL, &[], false)),
            Arc::new(ContentHasher::new()),
            Arc::new(CacheStore::in_memory()),
            context,
        )
    }

    #[test]
    fn test_get_or_parse_caches() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("math.js");
        std::fs::write(&file, "export function add(a, b) { return a + b; }\n").unwrap();

        let parser = CountingParser(AtomicUsize::new(0));
        let cache = cache(true, ContextInclusionConfig::default());

        let first = cache.get_or_parse(&file, dir.path(), "main", &parser).unwrap();
        let second = cache.get_or_parse(&file, dir.path(), "main", &parser).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.unwrap().exports, vec!["add"]);
        assert_eq!(parser.0.load(Ordering::SeqCst), 1);

        std::fs::write(&file, "export function sum(a, b) { return a + b; }\n").unwrap();
        let third = cache.get_or_parse(&file, dir.path(), "main", &parser).unwrap();
        assert_eq!(third.unwrap().exports, vec!["sum"]);
        assert_eq!(parser.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "def f():\n    pass\n").unwrap();

        let parser = CountingParser(AtomicUsize::new(0));
        let cache = cache(false, ContextInclusionConfig::default());
        cache.get_or_parse(&file, dir.path(), "main", &parser).unwrap();
        cache.get_or_parse(&file, dir.path(), "main", &parser).unwrap();
        assert_eq!(parser.0.load(Ordering::SeqCst), 2);
        assert!(cache.store().is_empty());
    }

    #[test]
    fn test_context_limits() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("many.js");
        std::fs::write(
            &file,
            "function a() {}\nfunction b() {}\nfunction c() {}\n",
        )
        .unwrap();
        let complex = dir.path().join("complex.js");
        std::fs::write(
            &complex,
            "function f(x) { if (x) {} if (x) {} if (x) {} while (x) {} }\n",
        )
        .unwrap();

        let parser = SurfaceParser::new();
        let cache = cache(
            true,
            ContextInclusionConfig {
                max_functions: 2,
                max_complexity_score: 3,
            },
        );

        let ast = cache
            .get_for_context(&file, dir.path(), "main", &parser)
            .unwrap()
            .unwrap();
        assert_eq!(ast.functions.len(), 2);
        assert!(cache
            .get_for_context(&complex, dir.path(), "main", &parser)
            .unwrap()
            .is_none());
    }
}
