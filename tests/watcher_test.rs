use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use astcache::config::{CacheConfig, WatcherConfig};
use astcache::{
    CacheEvent, CacheKeyGenerator, ChangeEvent, ChangeSink, ChangeType, EventBus, FileWatcher,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn watcher(events: EventBus, sink: mpsc::Sender<ChangeEvent>) -> FileWatcher {
    let keys = CacheKeyGenerator::from_config(&CacheConfig::default());
    let config = WatcherConfig {
        debounce_ms: 100,
        ..WatcherConfig::default()
    };
    let sink: Arc<dyn ChangeSink> = Arc::new(sink);
    FileWatcher::new(Arc::new(keys), &config, events).with_sink(sink)
}

/// Give the OS watcher time to register before touching files.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

async fn drain(rx: &mut mpsc::Receiver<ChangeEvent>, quiet: Duration) -> Vec<ChangeEvent> {
    let mut changes = Vec::new();
    while let Ok(Some(change)) = timeout(quiet, rx.recv()).await {
        changes.push(change);
    }
    changes
}

#[tokio::test]
async fn test_rapid_saves_produce_one_change() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("app.js");
    std::fs::write(&file, "export const v = 0;\n").unwrap();

    let (tx, mut rx) = mpsc::channel(64);
    let watcher = watcher(EventBus::default(), tx);
    watcher.watch(dir.path()).unwrap();
    settle().await;

    for i in 1..=5 {
        std::fs::write(&file, format!("export const v = {i};\n")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let changes = drain(&mut rx, Duration::from_millis(600)).await;
    assert_eq!(changes.len(), 1, "{changes:?}");
    assert_eq!(changes[0].change_type, ChangeType::Modify);
    assert!(changes[0].file_path.ends_with("app.js"));
    assert_eq!(changes[0].old_content.as_deref(), Some("export const v = 0;\n"));
    assert_eq!(changes[0].new_content.as_deref(), Some("export const v = 5;\n"));

    watcher.stop_all();
}

#[tokio::test]
async fn test_excluded_and_unsupported_files_are_silent() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();

    let (tx, mut rx) = mpsc::channel(64);
    let watcher = watcher(EventBus::default(), tx);
    watcher.watch(dir.path()).unwrap();
    settle().await;

    std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
    std::fs::write(dir.path().join("bundle.min.js"), "x").unwrap();

    assert!(drain(&mut rx, Duration::from_millis(500)).await.is_empty());
}

#[tokio::test]
async fn test_stop_watching_cancels_pending_changes() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("lib.py");
    std::fs::write(&file, "def f():\n    pass\n").unwrap();

    let events = EventBus::default();
    let mut event_rx = events.subscribe();
    let (tx, mut rx) = mpsc::channel(64);
    let watcher = FileWatcher::new(
        Arc::new(CacheKeyGenerator::from_config(&CacheConfig::default())),
        &WatcherConfig {
            debounce_ms: 300,
            ..WatcherConfig::default()
        },
        events,
    )
    .with_sink(Arc::new(tx));
    watcher.watch(dir.path()).unwrap();
    settle().await;

    std::fs::write(&file, "def g():\n    pass\n").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(watcher.stop_watching(dir.path()));

    assert!(drain(&mut rx, Duration::from_millis(600)).await.is_empty());
    assert!(!watcher.is_watching(dir.path()));

    let mut names = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        names.push(event.name());
    }
    assert_eq!(names.first(), Some(&"watching-started"));
    assert_eq!(names.last(), Some(&"watching-stopped"));
}

#[tokio::test]
async fn test_delete_carries_previous_content() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("gone.rs");
    std::fs::write(&file, "pub fn gone() {}\n").unwrap();

    let events = EventBus::default();
    let mut event_rx = events.subscribe();
    let (tx, mut rx) = mpsc::channel(64);
    let watcher = watcher(events, tx);
    watcher.watch(dir.path()).unwrap();
    settle().await;

    std::fs::remove_file(&file).unwrap();
    let changes = drain(&mut rx, Duration::from_millis(600)).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_type, ChangeType::Delete);
    assert_eq!(changes[0].old_content.as_deref(), Some("pub fn gone() {}\n"));

    let mut saw_invalidate = false;
    while let Ok(event) = event_rx.try_recv() {
        if let CacheEvent::CacheInvalidate { file_path, .. } = event {
            saw_invalidate |= file_path.ends_with(Path::new("gone.rs"));
        }
    }
    assert!(saw_invalidate);
}

#[tokio::test]
async fn test_each_root_reports_its_own_changes() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();

    let (tx, mut rx) = mpsc::channel(64);
    let watcher = watcher(EventBus::default(), tx);
    let first_root = watcher.watch(first.path()).unwrap();
    let second_root = watcher.watch(second.path()).unwrap();
    settle().await;

    std::fs::write(first_root.join("one.ts"), "export const one = 1;\n").unwrap();
    std::fs::write(second_root.join("two.go"), "package two\n").unwrap();

    let changes = drain(&mut rx, Duration::from_millis(600)).await;
    assert_eq!(changes.len(), 2, "{changes:?}");
    assert!(changes.iter().any(|c| c.file_path == first_root.join("one.ts")));
    assert!(changes.iter().any(|c| c.file_path == second_root.join("two.go")));
    assert!(changes.iter().all(|c| c.change_type == ChangeType::Add));

    watcher.stop_all();
}
