use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use astcache::batch::BatchStrategy;
use astcache::config::{BatchConfig, CacheConfig, InvalidationConfig};
use astcache::dependency::{DependencyTracker, TrackerOptions};
use astcache::{
    AstParser, AstSummary, BatchInvalidation, CacheEvent, CacheKeyGenerator, CacheStore,
    ChangeEvent, ContentHasher, EventBus, SelectiveInvalidation, SurfaceParser,
};
use tempfile::TempDir;

struct Setup {
    dir: TempDir,
    store: Arc<CacheStore>,
    engine: Arc<SelectiveInvalidation>,
    batch: BatchInvalidation,
    events: EventBus,
}

fn setup(config: BatchConfig) -> Setup {
    let dir = TempDir::new().unwrap();
    let files = [
        ("lib/core.js", "export const core = 1;\n"),
        ("lib/a.js", "import { core } from './core';\nexport const a = core;\n"),
        ("lib/b.js", "import { core } from './core';\nexport const b = core;\n"),
        ("main.js", "import { a } from './lib/a';\nimport { b } from './lib/b';\n"),
    ];
    for (path, content) in files {
        let path = dir.path().join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    let keys = CacheKeyGenerator::from_config(&CacheConfig::default());
    let parser: Arc<dyn AstParser> = Arc::new(SurfaceParser::new());
    let mut tracker = DependencyTracker::new(dir.path(), TrackerOptions::default());
    tracker.scan_project(parser.as_ref(), &keys).unwrap();

    let store = Arc::new(CacheStore::in_memory());
    for (path, _) in files {
        let key = keys
            .generate_key(&dir.path().join(path), dir.path(), "main", None)
            .unwrap();
        store.set(&key, AstSummary::default(), "h").unwrap();
    }

    let events = EventBus::new(256);
    let engine = Arc::new(
        SelectiveInvalidation::new(
            dir.path(),
            store.clone(),
            Some(tracker.into_shared()),
            Arc::new(ContentHasher::new()),
            parser.clone(),
            &InvalidationConfig::default(),
        )
        .with_events(events.clone()),
    );
    let batch = BatchInvalidation::new(engine.clone(), parser, &config, Some(events.clone()));
    Setup {
        dir,
        store,
        engine,
        batch,
        events,
    }
}

fn touch(root: &Path, path: &str) -> ChangeEvent {
    ChangeEvent::modified(root.join(path), None, None)
}

#[tokio::test]
async fn test_changes_in_one_window_form_one_batch() {
    let s = setup(BatchConfig {
        strategy: BatchStrategy::TimeBased,
        window_ms: 100,
        ..BatchConfig::default()
    });
    let mut rx = s.events.subscribe();

    for path in ["lib/a.js", "lib/b.js", "main.js", "lib/a.js"] {
        assert!(s.batch.queue_change(touch(s.dir.path(), path)).unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(s.batch.pending(), 3);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let mut batches = Vec::new();
    let mut queued = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            CacheEvent::BatchComplete { changes, .. } => batches.push(changes),
            CacheEvent::ChangeQueued { .. } => queued += 1,
            _ => {}
        }
    }
    assert_eq!(queued, 4);
    assert_eq!(batches, vec![3]);
    assert_eq!(s.batch.get_batch_status().total_batches, 1);
    assert_eq!(s.batch.pending(), 0);
}

#[tokio::test]
async fn test_shutdown_flushes_pending_changes() {
    let s = setup(BatchConfig {
        strategy: BatchStrategy::TimeBased,
        window_ms: 60_000,
        ..BatchConfig::default()
    });
    s.batch.queue_change(touch(s.dir.path(), "main.js")).unwrap();

    let reports = s.batch.shutdown();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].processed, 1);
    assert!(s.batch.queue_change(touch(s.dir.path(), "lib/a.js")).is_err());
}

#[test]
fn test_failing_change_does_not_stop_the_batch() {
    let s = setup(BatchConfig {
        strategy: BatchStrategy::TimeBased,
        ..BatchConfig::default()
    });
    let mut rx = s.events.subscribe();

    s.batch
        .queue_changes([
            touch(s.dir.path(), "main.js"),
            ChangeEvent::modified("/somewhere/else/x.js", None, None),
            touch(s.dir.path(), "lib/b.js"),
        ])
        .unwrap();
    let reports = s.batch.flush_batches();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.changes, 3);
    assert_eq!(report.processed, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].file_path, PathBuf::from("/somewhere/else/x.js"));
    // main.js and b.js; main.js has no importers so b.js stays narrow.
    assert_eq!(report.keys_removed, 2);
    assert_eq!(s.store.len(), 2);

    let mut errors = 0;
    while let Ok(event) = rx.try_recv() {
        if let CacheEvent::BatchError { file_path, .. } = event {
            assert_eq!(file_path, PathBuf::from("/somewhere/else/x.js"));
            errors += 1;
        }
    }
    assert_eq!(errors, 1);
}

#[test]
fn test_deleted_file_updates_graph_after_eviction() {
    let s = setup(BatchConfig {
        strategy: BatchStrategy::Immediate,
        ..BatchConfig::default()
    });
    let core = s.dir.path().join("lib/core.js");
    std::fs::remove_file(&core).unwrap();

    let reports = s
        .batch
        .queue_change(ChangeEvent::deleted(&core, Some("export const core = 1;\n".into())))
        .unwrap();
    assert_eq!(reports.len(), 1);
    // core.js, both importers and main.js.
    assert_eq!(reports[0].keys_removed, 4);
    assert!(s.store.is_empty());

    let tracker = s.engine.tracker().unwrap().read();
    assert!(!tracker.contains(Path::new("lib/core.js")));
    assert!(tracker.get_dependencies(Path::new("lib/a.js")).is_empty());
}

#[test]
fn test_readded_file_regains_its_importers() {
    let s = setup(BatchConfig {
        strategy: BatchStrategy::Immediate,
        ..BatchConfig::default()
    });
    let core = s.dir.path().join("lib/core.js");
    let content = std::fs::read_to_string(&core).unwrap();

    std::fs::remove_file(&core).unwrap();
    s.batch
        .queue_change(ChangeEvent::deleted(&core, Some(content.clone())))
        .unwrap();
    assert!(s.engine.tracker().unwrap().read().get_dependents(Path::new("lib/core.js")).is_empty());

    std::fs::write(&core, &content).unwrap();
    s.batch
        .queue_change(ChangeEvent::added(&core, Some(content.clone())))
        .unwrap();
    assert_eq!(
        s.engine.tracker().unwrap().read().get_dependents(Path::new("lib/core.js")),
        vec![PathBuf::from("lib/a.js"), PathBuf::from("lib/b.js")]
    );

    let rename = ChangeEvent::modified(
        &core,
        Some(content.clone()),
        Some(content.replace("core", "kernel")),
    );
    let plan = s.engine.plan(&rename, None).unwrap();
    let scope = plan.scope.unwrap();
    assert_eq!(
        scope.dependents,
        vec![PathBuf::from("lib/a.js"), PathBuf::from("lib/b.js")]
    );
    assert!(scope.transitive.contains(&PathBuf::from("main.js")));
}
