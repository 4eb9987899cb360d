//! Deterministic, filesystem-safe cache keys.
//!
//! A key is `language/branch-hash/path`. The branch is restricted to
//! `[A-Za-z0-9._]` so that the last hyphen in the middle segment always
//! separates branch from hash, which keeps [`CacheKeyGenerator::parse_key`]
//! an exact inverse of key generation.

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use dashmap::DashMap;
use glob::Pattern;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};

use super::hasher::short_digest;
use crate::config::CacheConfig;
use crate::language::Language;

/// Maximum length of a sanitized branch name.
pub const MAX_BRANCH_LEN: usize = 50;

/// Branch used when none (or an empty one) is supplied.
pub const DEFAULT_BRANCH: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub language: Language,
    pub branch: String,
    pub hash: String,
    pub relative_path: String,
}

impl CacheKey {
    /// Compose a key, sanitizing every component.
    pub fn new(language: Language, branch: &str, hash: &str, relative_path: &str) -> Self {
        Self {
            language,
            branch: sanitize_branch(branch),
            hash: sanitize_hash(hash),
            relative_path: sanitize_path(relative_path),
        }
    }

    /// Parse a serialized key. Only accepts keys in canonical form.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, '/');
        let language_name = parts.next()?;
        let middle = parts.next()?;
        let relative_path = parts.next()?;

        let language = Language::ALL
            .into_iter()
            .find(|l| l.as_str() == language_name)?;
        let (branch, hash) = middle.rsplit_once('-')?;
        if branch.is_empty() || hash.is_empty() || relative_path.is_empty() {
            return None;
        }

        Some(Self {
            language,
            branch: branch.to_string(),
            hash: hash.to_string(),
            relative_path: relative_path.to_string(),
        })
    }

    /// Whether this key caches `relative_path` in `language`.
    pub fn is_for_file(&self, language: Language, relative_path: &str) -> bool {
        self.language == language && self.relative_path == sanitize_path(relative_path)
    }

    /// Location of the entry file under the cache root.
    pub fn storage_path(&self, cache_root: &Path) -> PathBuf {
        cache_root
            .join(self.language.as_str())
            .join(format!("{}-{}", self.branch, self.hash))
            .join(format!("{}.json", self.relative_path))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}-{}/{}",
            self.language, self.branch, self.hash, self.relative_path
        )
    }
}

/// Replace anything outside `[A-Za-z0-9._]` with `_` and cap the length.
pub fn sanitize_branch(branch: &str) -> String {
    let sanitized: String = branch
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_BRANCH_LEN)
        .collect();

    if sanitized.is_empty() {
        DEFAULT_BRANCH.to_string()
    } else {
        sanitized
    }
}

fn sanitize_hash(hash: &str) -> String {
    let sanitized: String = hash
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if sanitized.is_empty() {
        "0".to_string()
    } else {
        sanitized
    }
}

/// Normalize separators and strip anything that could escape the cache root.
pub fn sanitize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .map(|part| {
            if part == ".." {
                return "__".to_string();
            }
            part.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect()
        })
        .collect::<Vec<String>>()
        .join("/")
}

/// Path of `file_path` relative to `project_root`, with `/` separators.
///
/// Relative inputs are taken as already relative to the root. Returns
/// `None` when an absolute path lies outside the root.
pub fn relative_path(file_path: &Path, project_root: &Path) -> Option<String> {
    let relative = if file_path.is_absolute() {
        file_path.strip_prefix(project_root).ok()?
    } else {
        file_path
    };

    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Builds cache keys and decides which files are cacheable at all.
#[derive(Debug)]
pub struct CacheKeyGenerator {
    supported: HashSet<Language>,
    excludes: Vec<Pattern>,
    respect_gitignore: bool,
    /// Root `.gitignore` per project root, loaded on first use.
    gitignores: DashMap<PathBuf, Option<Gitignore>>,
}

impl CacheKeyGenerator {
    pub fn new(
        supported: impl IntoIterator<Item = Language>,
        exclude_patterns: &[String],
        respect_gitignore: bool,
    ) -> Self {
        let excludes = exclude_patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!("[keys] ignoring invalid exclude pattern '{p}': {e}");
                    None
                }
            })
            .collect();

        Self {
            supported: supported.into_iter().collect(),
            excludes,
            respect_gitignore,
            gitignores: DashMap::new(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.languages(),
            &config.exclude_patterns,
            config.respect_gitignore,
        )
    }

    pub fn supports(&self, language: Language) -> bool {
        self.supported.contains(&language)
    }

    /// Whether a root-relative path matches an exclusion glob.
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        let normalized = relative_path.replace('\\', "/");
        self.excludes.iter().any(|p| p.matches(&normalized))
    }

    fn is_gitignored(&self, relative_path: &str, project_root: &Path) -> bool {
        if !self.respect_gitignore {
            return false;
        }
        let entry = self
            .gitignores
            .entry(project_root.to_path_buf())
            .or_insert_with(|| load_gitignore(project_root));
        match entry.value() {
            Some(gitignore) => gitignore
                .matched_path_or_any_parents(Path::new(relative_path), false)
                .is_ignore(),
            None => false,
        }
    }

    /// Forget loaded `.gitignore` files so they are re-read on next use.
    pub fn reload_gitignores(&self) {
        self.gitignores.clear();
    }

    /// Language and root-relative path of a cacheable file.
    ///
    /// `None` for excluded, gitignored, unsupported or out-of-root paths.
    pub fn classify(&self, file_path: &Path, project_root: &Path) -> Option<(Language, String)> {
        let relative = relative_path(file_path, project_root)?;
        if self.is_excluded(&relative) || self.is_gitignored(&relative, project_root) {
            return None;
        }
        let language = Language::from_path(Path::new(&relative))?;
        if !self.supports(language) {
            return None;
        }
        Some((language, relative))
    }

    /// Key for a file on disk.
    ///
    /// The hash is `commit_hash` when given, otherwise a digest of the file
    /// content. Unreadable files produce no key.
    pub fn generate_key(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
        commit_hash: Option<&str>,
    ) -> Option<CacheKey> {
        let (language, relative) = self.classify(file_path, project_root)?;
        let hash = match commit_hash {
            Some(hash) => hash.to_string(),
            None => {
                let absolute = project_root.join(&relative);
                match std::fs::read(&absolute) {
                    Ok(bytes) => short_digest(&bytes),
                    Err(e) => {
                        tracing::debug!("[keys] cannot read {}: {e}", absolute.display());
                        return None;
                    }
                }
            }
        };
        Some(CacheKey::new(language, branch, &hash, &relative))
    }

    /// Key for content already in memory.
    pub fn generate_key_from_content(
        &self,
        content: &str,
        language: Language,
        relative_path: &str,
        branch: &str,
        commit_hash: Option<&str>,
    ) -> Option<CacheKey> {
        if !self.supports(language) || self.is_excluded(relative_path) {
            return None;
        }
        let hash = match commit_hash {
            Some(hash) => hash.to_string(),
            None => short_digest(content.as_bytes()),
        };
        Some(CacheKey::new(language, branch, &hash, relative_path))
    }

    pub fn parse_key(&self, key: &str) -> Option<CacheKey> {
        CacheKey::parse(key)
    }

    /// Common prefix of every key stored for `language` on `branch`.
    pub fn key_prefix(&self, language: Language, branch: &str) -> String {
        format!("{}/{}-", language, sanitize_branch(branch))
    }
}

fn load_gitignore(project_root: &Path) -> Option<Gitignore> {
    let path = project_root.join(".gitignore");
    if !path.exists() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(project_root);
    if let Some(e) = builder.add(&path) {
        tracing::warn!("[keys] failed to read {}: {e}", path.display());
        return None;
    }
    match builder.build() {
        Ok(gitignore) => Some(gitignore),
        Err(e) => {
            tracing::warn!("[keys] failed to load {}: {e}", path.display());
            None
        }
    }
}
