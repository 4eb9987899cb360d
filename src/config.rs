//! Layered configuration for the cache and its invalidation engine.
//!
//! Sources, lowest precedence first:
//! - Built-in defaults
//! - `.astcache/settings.toml` (found by walking up from the current directory)
//! - Environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `ASTCACHE_` and use double
//! underscores to separate nested levels:
//! - `ASTCACHE_CACHE__ENABLED=false` sets `cache.enabled`
//! - `ASTCACHE_INVALIDATION__STRATEGY=aggressive` sets `invalidation.strategy`
//! - `ASTCACHE_BATCH__WINDOW_MS=250` sets `batch.window_ms`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::BatchStrategy;
use crate::invalidation::InvalidationStrategy;
use crate::language::Language;

/// Directory holding the settings file, relative to the workspace root.
pub const CONFIG_DIR: &str = ".astcache";
pub const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "ASTCACHE_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Configuration file already exists at {0}. Use --force to overwrite")]
    AlreadyExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace root directory (where .astcache is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Limits applied when cached summaries are handed to context builders
    #[serde(default)]
    pub context_inclusion: ContextInclusionConfig,

    #[serde(default)]
    pub invalidation: InvalidationConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// When false every lookup misses and every store is a no-op
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory, relative to the workspace root unless absolute
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,

    /// Language names eligible for caching
    #[serde(default = "default_supported_languages")]
    pub supported_languages: Vec<String>,

    /// Glob patterns (relative to the project root) never cached or watched
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Skip files matched by the project's .gitignore
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,

    /// Entries older than this are collected by the cleaner
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Size ceiling enforced by the cleaner's LRU sweep
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// How long evicted entries stay restorable by rollback
    #[serde(default = "default_quarantine_grace_secs")]
    pub quarantine_grace_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ContextInclusionConfig {
    #[serde(default = "default_max_functions")]
    pub max_functions: usize,

    #[serde(default = "default_max_complexity_score")]
    pub max_complexity_score: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InvalidationConfig {
    #[serde(default)]
    pub strategy: InvalidationStrategy,

    /// Upper bound on traversal depth for every strategy
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Keep test-file imports in a separate graph
    #[serde(default = "default_true")]
    pub track_test_files: bool,

    #[serde(default = "default_true")]
    pub circular_detection: bool,

    /// Number of invalidation records kept for inspection and rollback
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BatchConfig {
    #[serde(default)]
    pub strategy: BatchStrategy,

    /// Window length for time-based and hybrid batching
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Maximum changes handled by one window
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Maximum files evicted by one window
    #[serde(default = "default_max_scope_size")]
    pub max_scope_size: usize,

    /// Estimated scope that triggers a size-based flush
    #[serde(default = "default_size_threshold")]
    pub size_threshold: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Files above this size are not snapshotted for old-content diffing
    #[serde(default = "default_snapshot_max_bytes")]
    pub snapshot_max_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `store = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_cache_root() -> PathBuf {
    PathBuf::from(".taskmaster/ast-cache")
}
fn default_supported_languages() -> Vec<String> {
    Language::ALL.iter().map(|l| l.as_str().to_string()).collect()
}
fn default_exclude_patterns() -> Vec<String> {
    [
        "node_modules/**",
        "target/**",
        "dist/**",
        "build/**",
        ".git/**",
        "**/*.min.js",
        "**/*.generated.*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_age_secs() -> u64 {
    24 * 60 * 60
}
fn default_max_size_mb() -> u64 {
    100
}
fn default_cleanup_interval_secs() -> u64 {
    60 * 60
}
fn default_quarantine_grace_secs() -> u64 {
    300
}
fn default_max_functions() -> usize {
    10
}
fn default_max_complexity_score() -> u32 {
    10
}
fn default_max_depth() -> usize {
    5
}
fn default_history_size() -> usize {
    100
}
fn default_window_ms() -> u64 {
    500
}
fn default_max_batch_size() -> usize {
    50
}
fn default_max_scope_size() -> usize {
    500
}
fn default_size_threshold() -> usize {
    100
}
fn default_debounce_ms() -> u64 {
    100
}
fn default_snapshot_max_bytes() -> u64 {
    1024 * 1024
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            cache: CacheConfig::default(),
            context_inclusion: ContextInclusionConfig::default(),
            invalidation: InvalidationConfig::default(),
            batch: BatchConfig::default(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: default_cache_root(),
            supported_languages: default_supported_languages(),
            exclude_patterns: default_exclude_patterns(),
            respect_gitignore: true,
            max_age_secs: default_max_age_secs(),
            max_size_mb: default_max_size_mb(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            quarantine_grace_secs: default_quarantine_grace_secs(),
        }
    }
}

impl CacheConfig {
    /// Configured languages; unknown names are skipped with a warning.
    pub fn languages(&self) -> Vec<Language> {
        self.supported_languages
            .iter()
            .filter_map(|name| {
                let language = Language::from_name(name);
                if language.is_none() {
                    tracing::warn!("[config] unknown language '{name}' in supported_languages");
                }
                language
            })
            .collect()
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn quarantine_grace(&self) -> Duration {
        Duration::from_secs(self.quarantine_grace_secs)
    }

    /// Cache directory resolved against `workspace_root`.
    pub fn resolve_root(&self, workspace_root: &Path) -> PathBuf {
        if self.root.is_absolute() {
            self.root.clone()
        } else {
            workspace_root.join(&self.root)
        }
    }
}

impl Default for ContextInclusionConfig {
    fn default() -> Self {
        Self {
            max_functions: default_max_functions(),
            max_complexity_score: default_max_complexity_score(),
        }
    }
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            strategy: InvalidationStrategy::default(),
            max_depth: default_max_depth(),
            track_test_files: true,
            circular_detection: true,
            history_size: default_history_size(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            strategy: BatchStrategy::default(),
            window_ms: default_window_ms(),
            max_batch_size: default_max_batch_size(),
            max_scope_size: default_max_scope_size(),
            size_threshold: default_size_threshold(),
        }
    }
}

impl BatchConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            snapshot_max_bytes: default_snapshot_max_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        let mut settings = Self::figment(&config_path)
            .extract::<Settings>()
            .map_err(Box::new)?;
        if settings.workspace_root.is_none() {
            settings.workspace_root = Self::workspace_root();
        }
        Ok(settings)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Ok(Self::figment(path.as_ref())
            .extract()
            .map_err(Box::new)?)
    }

    /// Like [`Settings::load`], falling back to defaults on any error.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("[config] using defaults: {e}");
                Settings {
                    workspace_root: Self::workspace_root(),
                    ..Settings::default()
                }
            }
        }
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels; single underscores
            // stay part of the field name.
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
    }

    /// Find the settings file by looking for .astcache upwards
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Nearest ancestor of the current directory holding `.astcache`
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Workspace root, or the current directory when none is configured.
    pub fn project_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Write a default settings file under `workspace/.astcache/`.
    pub fn init_config_file(workspace: &Path, force: bool) -> ConfigResult<PathBuf> {
        let config_path = workspace.join(CONFIG_DIR).join(CONFIG_FILE);
        if !force && config_path.exists() {
            return Err(ConfigError::AlreadyExists(config_path));
        }

        let settings = Settings {
            workspace_root: Some(workspace.to_path_buf()),
            ..Settings::default()
        };
        settings.save(&config_path)?;
        crate::log_event!("config", "initialized", "{}", config_path.display());
        Ok(config_path)
    }
}
