use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use astcache::config::{CacheConfig, InvalidationConfig};
use astcache::dependency::{DependencyTracker, SharedDependencyTracker, TrackerOptions};
use astcache::{
    AstSummary, CacheKeyGenerator, CacheStore, ChangeEvent, ChangeImpact, ContentHasher,
    InvalidationOptions, InvalidationStrategy, SelectiveInvalidation, SurfaceParser,
};
use tempfile::TempDir;

const MATH: &str = "/** Math helpers. */\nexport function add(a, b) {\n  return a + b;\n}\n";

const FILES: &[(&str, &str)] = &[
    ("src/utils/math.js", MATH),
    (
        "src/calc.js",
        "import { add } from './utils/math';\nexport function total(xs) {\n  return xs.reduce(add, 0);\n}\n",
    ),
    (
        "src/stats.js",
        "import { add } from './utils/math.js';\nexport const mean = (xs) => xs.reduce(add, 0) / xs.length;\n",
    ),
    (
        "src/app.js",
        "import { total } from './calc';\nconsole.log(total([1, 2, 3]));\n",
    ),
    (
        "src/other.js",
        "export const unrelated = true;\n",
    ),
    (
        "tests/math.test.js",
        "import { add } from '../src/utils/math';\ntest('add', () => expect(add(1, 2)).toBe(3));\n",
    ),
];

struct Project {
    dir: TempDir,
    store: Arc<CacheStore>,
    tracker: SharedDependencyTracker,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for (path, content) in FILES {
            let path = dir.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        let keys = CacheKeyGenerator::from_config(&CacheConfig::default());
        let mut tracker = DependencyTracker::new(dir.path(), TrackerOptions::default());
        tracker.scan_project(&SurfaceParser::new(), &keys).unwrap();

        let store = Arc::new(CacheStore::in_memory());
        for (path, content) in FILES {
            let key = keys
                .generate_key(&dir.path().join(path), dir.path(), "main", None)
                .unwrap();
            store.set(&key, AstSummary::default(), *content).unwrap();
        }

        Self {
            dir,
            store,
            tracker: tracker.into_shared(),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn engine(&self, config: InvalidationConfig) -> SelectiveInvalidation {
        SelectiveInvalidation::new(
            self.root(),
            self.store.clone(),
            Some(self.tracker.clone()),
            Arc::new(ContentHasher::new()),
            Arc::new(SurfaceParser::new()),
            &config,
        )
    }

    fn math_change(&self, new: String) -> ChangeEvent {
        ChangeEvent::modified(
            self.root().join("src/utils/math.js"),
            Some(MATH.to_string()),
            Some(new),
        )
    }
}

fn files(outcome: &astcache::invalidation::InvalidationOutcome) -> BTreeSet<PathBuf> {
    outcome
        .scope
        .as_ref()
        .map(|s| s.files().into_iter().collect())
        .unwrap_or_default()
}

#[test]
fn test_exported_rename_is_critical_and_reaches_importers() {
    let project = Project::new();
    let engine = project.engine(InvalidationConfig::default());
    let change = project.math_change(MATH.replace("add", "sum"));

    let outcome = engine
        .invalidate_by_change(&change, &InvalidationOptions::default())
        .unwrap();
    assert_eq!(outcome.impact, ChangeImpact::Critical);
    assert_eq!(outcome.strategy, InvalidationStrategy::Balanced);

    let scope = outcome.scope.clone().unwrap();
    assert_eq!(scope.direct, vec![PathBuf::from("src/utils/math.js")]);
    let dependents: BTreeSet<_> = scope.dependents.iter().cloned().collect();
    assert_eq!(
        dependents,
        BTreeSet::from([PathBuf::from("src/calc.js"), PathBuf::from("src/stats.js")])
    );
    assert!(scope.transitive.contains(&PathBuf::from("src/app.js")));
    assert!(scope.test_files.contains(&PathBuf::from("tests/math.test.js")));
    assert!(!scope.contains(Path::new("src/other.js")));

    assert_eq!(outcome.invalidated.len(), scope.total);
    assert_eq!(project.store.len(), FILES.len() - scope.total);
    assert_eq!(engine.get_history(None).len(), 1);
}

#[test]
fn test_trailing_whitespace_edit_invalidates_nothing() {
    let project = Project::new();
    let engine = project.engine(InvalidationConfig::default());
    let change = project.math_change(MATH.replace(";\n", ";   \n") + "\n\n");

    let outcome = engine
        .invalidate_by_change(&change, &InvalidationOptions::default())
        .unwrap();
    assert_eq!(outcome.impact, ChangeImpact::None);
    assert!(outcome.invalidated.is_empty());
    assert!(outcome.scope.is_none());
    assert_eq!(project.store.len(), FILES.len());
}

#[test]
fn test_aggressive_scope_is_subset_of_conservative() {
    let project = Project::new();
    let engine = project.engine(InvalidationConfig::default());
    let changes = [
        // Critical: exported surface.
        project.math_change(MATH.replace("add", "sum")),
        // Medium: body only.
        project.math_change(MATH.replace("a + b", "b + a")),
        // Low: doc comment only.
        project.math_change(MATH.replace("Math helpers.", "Arithmetic.")),
        ChangeEvent::deleted(project.root().join("src/calc.js"), None),
    ];

    for change in &changes {
        let mut conservative = InvalidationOptions::dry_run();
        conservative.strategy = Some(InvalidationStrategy::Conservative);
        let mut aggressive = InvalidationOptions::dry_run();
        aggressive.strategy = Some(InvalidationStrategy::Aggressive);

        let wide = files(&engine.invalidate_by_change(change, &conservative).unwrap());
        let narrow = files(&engine.invalidate_by_change(change, &aggressive).unwrap());
        assert!(
            narrow.is_subset(&wide),
            "{:?}: {narrow:?} not within {wide:?}",
            change.change_type
        );
    }
    assert_eq!(project.store.len(), FILES.len());
}

#[test]
fn test_graph_drops_removed_import() {
    let project = Project::new();
    let mut tracker = project.tracker.write();
    let math = Path::new("src/utils/math.js");
    assert!(tracker.get_dependents(math).contains(&PathBuf::from("src/stats.js")));

    tracker.update_dependencies(Path::new("src/stats.js"), Vec::new());
    assert!(!tracker.get_dependents(math).contains(&PathBuf::from("src/stats.js")));
    assert!(tracker.get_dependents(math).contains(&PathBuf::from("src/calc.js")));
    assert!(tracker.get_dependencies(Path::new("src/stats.js")).is_empty());
}

#[test]
fn test_rollback_restores_evicted_entries() {
    let project = Project::new();
    let engine = project.engine(InvalidationConfig::default());
    let outcome = engine
        .invalidate_by_change(
            &project.math_change(MATH.replace("add", "sum")),
            &InvalidationOptions::default(),
        )
        .unwrap();
    let evicted = outcome.invalidated.len();
    assert!(evicted > 0);

    let report = engine.rollback_invalidation(outcome.record_id.unwrap()).unwrap();
    assert_eq!(report.restored.len(), evicted);
    assert_eq!(project.store.len(), FILES.len());
    assert!(engine.get_history(Some(1))[0].rolled_back);
}

#[test]
fn test_history_keeps_most_recent_records() {
    let project = Project::new();
    let engine = project.engine(InvalidationConfig {
        history_size: 3,
        ..InvalidationConfig::default()
    });
    for i in 0..5 {
        let change = ChangeEvent::modified(
            project.root().join("src/other.js"),
            Some(format!("export const unrelated = {i};\n")),
            Some(format!("export const unrelated = {};\n", i + 1)),
        );
        engine
            .invalidate_by_change(&change, &InvalidationOptions::default())
            .unwrap();
    }

    let ids: Vec<u64> = engine.get_history(None).iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![5, 4, 3]);
    assert_eq!(engine.get_stats().total_invalidations, 5);
    assert_eq!(engine.get_stats().history_len, 3);
}

#[test]
fn test_eviction_failure_keeps_record_of_other_files() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("project");
    let files = [
        ("a.js", "export function a() {}\n"),
        ("b.js", "import { a } from './a';\nexport const b = a;\n"),
        ("c.js", "import { a } from './a';\nexport const c = a;\n"),
    ];
    std::fs::create_dir_all(&root).unwrap();
    for (path, content) in files {
        std::fs::write(root.join(path), content).unwrap();
    }

    let keys = CacheKeyGenerator::from_config(&CacheConfig::default());
    let mut tracker = DependencyTracker::new(&root, TrackerOptions::default());
    tracker.scan_project(&SurfaceParser::new(), &keys).unwrap();

    let cache_root = dir.path().join("cache");
    let store = Arc::new(CacheStore::open(&cache_root).unwrap());
    let mut stored = Vec::new();
    for (path, content) in files {
        let key = keys.generate_key(&root.join(path), &root, "main", None).unwrap();
        store.set(&key, AstSummary::default(), content).unwrap();
        stored.push(key);
    }
    // b.js cannot be removed from disk.
    let blocked = stored[1].storage_path(&cache_root);
    std::fs::remove_file(&blocked).unwrap();
    std::fs::create_dir_all(blocked.join("blocker")).unwrap();

    let engine = SelectiveInvalidation::new(
        &root,
        store.clone(),
        Some(tracker.into_shared()),
        Arc::new(ContentHasher::new()),
        Arc::new(SurfaceParser::new()),
        &InvalidationConfig::default(),
    );
    let change = ChangeEvent::modified(
        root.join("a.js"),
        Some(files[0].1.to_string()),
        Some("export function renamed() {}\n".to_string()),
    );
    let outcome = engine
        .invalidate_by_change(&change, &InvalidationOptions::default())
        .unwrap();

    assert_eq!(outcome.impact, ChangeImpact::Critical);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].file_path, PathBuf::from("b.js"));
    let evicted: BTreeSet<String> = outcome.invalidated.iter().cloned().collect();
    assert_eq!(
        evicted,
        BTreeSet::from([stored[0].to_string(), stored[2].to_string()])
    );
    assert!(store.contains(&stored[1].to_string()));

    let report = engine.rollback_invalidation(outcome.record_id.unwrap()).unwrap();
    assert_eq!(report.restored.len(), 2);
    assert_eq!(store.len(), 3);
}
