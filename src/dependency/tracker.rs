//! Project-wide reverse dependency tracking.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use ignore::WalkBuilder;
use parking_lot::RwLock;
use serde::Serialize;

use super::error::{DependencyError, DependencyResult};
use super::graph::{DependencyGraph, EdgeKind, GraphDelta};
use super::resolver::{ImportResolver, normalize};
use crate::cache::CacheKeyGenerator;
use crate::config::InvalidationConfig;
use crate::language::{conventional_test_names, is_test_file};
use crate::parsing::{AstParser, ImportRef};

/// The tracker as shared between the batch path (the only writer after
/// initialization) and readers such as the invalidation planner.
pub type SharedDependencyTracker = Arc<RwLock<DependencyTracker>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerOptions {
    /// Depth bound for impact scoring.
    pub max_depth: usize,
    /// Keep edges that originate in test files in a separate graph.
    pub track_test_files: bool,
    /// Report import cycles after a build.
    pub circular_detection: bool,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            max_depth: 5,
            track_test_files: true,
            circular_detection: true,
        }
    }
}

impl From<&InvalidationConfig> for TrackerOptions {
    fn from(config: &InvalidationConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            track_test_files: config.track_test_files,
            circular_detection: config.circular_detection,
        }
    }
}

/// Imports of one file as reported by a parser.
#[derive(Debug, Clone, PartialEq)]
pub struct FileImports {
    pub path: PathBuf,
    pub imports: Vec<ImportRef>,
}

impl FileImports {
    pub fn new(path: impl Into<PathBuf>, imports: Vec<ImportRef>) -> Self {
        Self {
            path: path.into(),
            imports,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildStats {
    pub files: usize,
    pub edges: usize,
    pub test_edges: usize,
    /// Imports that did not resolve to a project file.
    pub unresolved: usize,
    pub cycles: Vec<Vec<PathBuf>>,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub struct DependencyTracker {
    project_root: PathBuf,
    options: TrackerOptions,
    graph: DependencyGraph,
    test_graph: DependencyGraph,
    resolver: ImportResolver,
    /// Imports per file as last parsed.
    imports: HashMap<PathBuf, Vec<ImportRef>>,
    /// Imports per file that did not resolve yet; retried when files appear.
    unresolved: HashMap<PathBuf, Vec<ImportRef>>,
}

impl DependencyTracker {
    pub fn new(project_root: impl Into<PathBuf>, options: TrackerOptions) -> Self {
        Self {
            project_root: project_root.into(),
            options,
            graph: DependencyGraph::new(),
            test_graph: DependencyGraph::new(),
            resolver: ImportResolver::new(),
            imports: HashMap::new(),
            unresolved: HashMap::new(),
        }
    }

    pub fn into_shared(self) -> SharedDependencyTracker {
        Arc::new(RwLock::new(self))
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn options(&self) -> TrackerOptions {
        self.options
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn test_graph(&self) -> &DependencyGraph {
        &self.test_graph
    }

    pub fn file_count(&self) -> usize {
        self.resolver.files().count()
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.resolver.contains(&self.relative(file))
    }

    /// Project-relative form of `path`. Relative inputs are taken as is.
    pub fn relative(&self, path: &Path) -> PathBuf {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.project_root).unwrap_or(path)
        } else {
            path
        };
        normalize(relative).unwrap_or_else(|| relative.to_path_buf())
    }

    fn routes_to_test_graph(&self, from: &Path) -> bool {
        self.options.track_test_files && is_test_file(from)
    }

    /// Rebuild both graphs from scratch.
    pub fn build_dependency_graph(&mut self, files: Vec<FileImports>) -> BuildStats {
        let started = Instant::now();
        self.graph.clear();
        self.test_graph.clear();
        self.resolver = ImportResolver::new();
        self.imports.clear();
        self.unresolved.clear();

        let files: Vec<FileImports> = files
            .into_iter()
            .map(|f| FileImports::new(self.relative(&f.path), f.imports))
            .collect();
        for file in &files {
            self.resolver.add_file(&file.path);
        }

        let mut stats = BuildStats {
            files: files.len(),
            ..Default::default()
        };
        for file in &files {
            let (targets, unresolved) = self.resolve_all(&file.path, &file.imports);
            stats.unresolved += unresolved.len();
            if !unresolved.is_empty() {
                self.unresolved.insert(file.path.clone(), unresolved);
            }
            let graph = if self.routes_to_test_graph(&file.path) {
                &mut self.test_graph
            } else {
                &mut self.graph
            };
            graph.set_dependencies(&file.path, &targets);
        }
        for file in files {
            if !file.imports.is_empty() {
                self.imports.insert(file.path, file.imports);
            }
        }

        stats.edges = self.graph.edge_count();
        stats.test_edges = self.test_graph.edge_count();
        if self.options.circular_detection {
            stats.cycles = self.detect_cycles();
            for cycle in &stats.cycles {
                tracing::warn!("[deps] import cycle: {}", display_cycle(cycle));
            }
        }
        stats.duration_ms = started.elapsed().as_millis() as u64;

        crate::log_event!(
            "deps",
            "built",
            "{} files, {} edges, {} test edges in {}ms",
            stats.files,
            stats.edges,
            stats.test_edges,
            stats.duration_ms
        );
        stats
    }

    /// Walk the project, parse every cacheable file and build the graph.
    pub fn scan_project(
        &mut self,
        parser: &dyn AstParser,
        keys: &CacheKeyGenerator,
    ) -> DependencyResult<BuildStats> {
        let root = self.project_root.clone();
        if !root.is_dir() {
            return Err(DependencyError::RootMissing(root));
        }

        let mut files = Vec::new();
        let walker = WalkBuilder::new(&root)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .follow_links(false)
            .build();
        for dirent in walker {
            let dirent = dirent.map_err(|e| DependencyError::Walk {
                root: root.clone(),
                reason: e.to_string(),
            })?;
            if !dirent.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = dirent.path();
            let Some((_, relative)) = keys.classify(path, &root) else {
                continue;
            };
            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::debug!("[deps] skipping unreadable {}: {e}", path.display());
                    continue;
                }
            };
            let imports = parser
                .parse_file(path, &content)
                .into_ast()
                .map(|ast| ast.imports)
                .unwrap_or_default();
            files.push(FileImports::new(relative, imports));
        }

        Ok(self.build_dependency_graph(files))
    }

    fn resolve_all(
        &self,
        from: &Path,
        imports: &[ImportRef],
    ) -> (HashMap<PathBuf, EdgeKind>, Vec<ImportRef>) {
        let to_test_graph = self.routes_to_test_graph(from);
        let mut targets = HashMap::new();
        let mut unresolved = Vec::new();
        for import in imports {
            let resolved = self.resolver.resolve(from, import);
            if resolved.is_empty() {
                unresolved.push(import.clone());
                continue;
            }
            let kind = if to_test_graph {
                EdgeKind::Test
            } else {
                import.kind
            };
            for target in resolved {
                targets.entry(target).or_insert(kind);
            }
        }
        (targets, unresolved)
    }

    /// Register a new file. Earlier imports that now resolve to it are
    /// linked; returns the files that gained an edge.
    pub fn add_file(&mut self, file: &Path) -> Vec<PathBuf> {
        let file = self.relative(file);
        if self.resolver.contains(&file) {
            return Vec::new();
        }
        self.resolver.add_file(&file);

        let pending: Vec<(PathBuf, Vec<ImportRef>)> = self.unresolved.drain().collect();
        let mut linked = Vec::new();
        for (source, imports) in pending {
            let mut still_unresolved = Vec::new();
            for import in imports {
                let resolved = self.resolver.resolve(&source, &import);
                if resolved.is_empty() {
                    still_unresolved.push(import);
                    continue;
                }
                let to_test_graph = self.routes_to_test_graph(&source);
                let kind = if to_test_graph { EdgeKind::Test } else { import.kind };
                let graph = if to_test_graph {
                    &mut self.test_graph
                } else {
                    &mut self.graph
                };
                for target in resolved {
                    if graph.add_edge(&source, &target, kind) && !linked.contains(&source) {
                        linked.push(source.clone());
                    }
                }
            }
            if !still_unresolved.is_empty() {
                self.unresolved.insert(source, still_unresolved);
            }
        }
        linked.sort();
        linked
    }

    /// Forget a file and every edge touching it.
    ///
    /// Importers keep their imports of `file` as unresolved, so a later
    /// [`add_file`](Self::add_file) of the same path links them again.
    pub fn remove_file(&mut self, file: &Path) {
        let file = self.relative(file);
        let mut importers = self.graph.dependents(&file);
        importers.extend(self.test_graph.dependents(&file));

        self.graph.remove_file(&file);
        self.test_graph.remove_file(&file);
        self.resolver.remove_file(&file);
        self.unresolved.remove(&file);
        self.imports.remove(&file);

        for importer in importers {
            let Some(imports) = self.imports.get(&importer) else {
                continue;
            };
            let unresolved: Vec<ImportRef> = imports
                .iter()
                .filter(|import| self.resolver.resolve(&importer, import).is_empty())
                .cloned()
                .collect();
            if !unresolved.is_empty() {
                self.unresolved.insert(importer, unresolved);
            }
        }
    }

    /// Replace the outgoing edges of `file` with already resolved paths.
    ///
    /// Edges to files no longer listed are removed in both directions.
    pub fn update_dependencies(
        &mut self,
        file: &Path,
        new_dependencies: impl IntoIterator<Item = PathBuf>,
    ) -> GraphDelta {
        let file = self.relative(file);
        let to_test_graph = self.routes_to_test_graph(&file);
        let kind = if to_test_graph {
            EdgeKind::Test
        } else {
            EdgeKind::Import
        };
        let targets: HashMap<PathBuf, EdgeKind> = new_dependencies
            .into_iter()
            .map(|dep| (self.relative(&dep), kind))
            .collect();
        self.imports.remove(&file);
        self.unresolved.remove(&file);
        self.apply_targets(&file, &targets)
    }

    /// Re-resolve `imports` for `file` and update its edges.
    pub fn update_from_imports(&mut self, file: &Path, imports: &[ImportRef]) -> GraphDelta {
        let file = self.relative(file);
        self.add_file(&file);
        let (targets, unresolved) = self.resolve_all(&file, imports);
        if imports.is_empty() {
            self.imports.remove(&file);
        } else {
            self.imports.insert(file.clone(), imports.to_vec());
        }
        if unresolved.is_empty() {
            self.unresolved.remove(&file);
        } else {
            self.unresolved.insert(file.clone(), unresolved);
        }
        self.apply_targets(&file, &targets)
    }

    fn apply_targets(&mut self, file: &Path, targets: &HashMap<PathBuf, EdgeKind>) -> GraphDelta {
        let delta = if self.routes_to_test_graph(file) {
            self.test_graph.set_dependencies(file, targets)
        } else {
            self.graph.set_dependencies(file, targets)
        };
        if !delta.is_empty() {
            crate::debug_event!(
                "deps",
                "updated",
                "{}: +{} -{}",
                file.display(),
                delta.added.len(),
                delta.removed.len()
            );
        }
        delta
    }

    /// Direct (production) dependents of `file`.
    pub fn get_dependents(&self, file: &Path) -> Vec<PathBuf> {
        self.graph.dependents(&self.relative(file))
    }

    /// Direct dependencies of `file`, from whichever graph holds them.
    pub fn get_dependencies(&self, file: &Path) -> Vec<PathBuf> {
        let file = self.relative(file);
        if self.routes_to_test_graph(&file) {
            self.test_graph.dependencies(&file)
        } else {
            self.graph.dependencies(&file)
        }
    }

    /// Transitive dependents grouped by distance.
    pub fn dependent_levels(&self, file: &Path, max_depth: usize) -> Vec<Vec<PathBuf>> {
        self.graph
            .dependent_levels(&self.relative(file), max_depth)
    }

    /// Fan-in weighted by distance, squashed into `[0, 1)`.
    ///
    /// Each dependent at distance `d` contributes `1 / d`; the sum `w`
    /// maps to `w / (w + 1)`.
    pub fn calculate_impact_score(&self, file: &Path) -> f64 {
        let weight: f64 = self
            .dependent_levels(file, self.options.max_depth)
            .iter()
            .enumerate()
            .map(|(depth, files)| files.len() as f64 / (depth + 1) as f64)
            .sum();
        weight / (weight + 1.0)
    }

    /// Tests that exercise `file`: importers in the test graph, test files
    /// among its direct dependents, and files named after it by convention.
    pub fn related_test_files(&self, file: &Path) -> Vec<PathBuf> {
        let file = self.relative(file);
        let mut tests: BTreeSet<PathBuf> = self.test_graph.dependents(&file).into_iter().collect();
        tests.extend(
            self.graph
                .dependents(&file)
                .into_iter()
                .filter(|d| is_test_file(d)),
        );

        let names = conventional_test_names(&file);
        if !names.is_empty() {
            tests.extend(
                self.resolver
                    .files()
                    .filter(|f| {
                        f.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| names.iter().any(|name| name == n))
                    })
                    .cloned(),
            );
        }
        tests.remove(&file);
        tests.into_iter().collect()
    }

    /// Import cycles among production files.
    pub fn detect_cycles(&self) -> Vec<Vec<PathBuf>> {
        self.graph.find_cycles()
    }
}

fn display_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
