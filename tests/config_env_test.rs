use std::env;

use astcache::Settings;
use astcache::batch::BatchStrategy;
use astcache::invalidation::InvalidationStrategy;
use tempfile::TempDir;

#[test]
fn test_file_then_env_layering() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");
    std::fs::write(
        &config_path,
        r#"
[cache]
max_age_secs = 7200
exclude_patterns = ["vendor/**"]

[invalidation]
strategy = "aggressive"

[batch]
strategy = "count-based"
window_ms = 250
"#,
    )
    .unwrap();

    unsafe {
        // Double underscore separates nested levels.
        env::set_var("ASTCACHE_BATCH__WINDOW_MS", "750");
        env::set_var("ASTCACHE_WATCHER__DEBOUNCE_MS", "40");
    }

    let settings = Settings::load_from(&config_path).unwrap();

    unsafe {
        env::remove_var("ASTCACHE_BATCH__WINDOW_MS");
        env::remove_var("ASTCACHE_WATCHER__DEBOUNCE_MS");
    }

    assert_eq!(settings.cache.max_age_secs, 7200);
    assert_eq!(settings.cache.exclude_patterns, vec!["vendor/**"]);
    assert_eq!(settings.invalidation.strategy, InvalidationStrategy::Aggressive);
    assert_eq!(settings.batch.strategy, BatchStrategy::CountBased);
    assert_eq!(settings.batch.window_ms, 750, "env overrides the file");
    assert_eq!(settings.watcher.debounce_ms, 40);
    // Untouched sections keep their defaults.
    assert_eq!(settings.batch.max_batch_size, 50);
    assert_eq!(settings.invalidation.history_size, 100);
}

#[test]
fn test_saved_settings_load_back() {
    let temp_dir = TempDir::new().unwrap();
    let path = Settings::init_config_file(temp_dir.path(), false).unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.workspace_root.as_deref(), Some(temp_dir.path()));
    assert_eq!(settings.cache.max_size_mb, 100);
    assert!(Settings::init_config_file(temp_dir.path(), false).is_err());
}
