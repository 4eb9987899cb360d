//! Forward and reverse adjacency over project files.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use crate::parsing::ImportKind as EdgeKind;

/// Directed edge from a dependent to the file it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: PathBuf,
    pub to: PathBuf,
    pub kind: EdgeKind,
}

/// Edges added and removed by one incremental update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphDelta {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl GraphDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// file -> files it imports
    forward: HashMap<PathBuf, HashMap<PathBuf, EdgeKind>>,
    /// file -> files importing it
    reverse: HashMap<PathBuf, HashSet<PathBuf>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Add an edge. Self edges are ignored; a repeated edge keeps its
    /// first kind.
    pub fn add_edge(&mut self, from: &Path, to: &Path, kind: EdgeKind) -> bool {
        if from == to {
            return false;
        }
        let targets = self.forward.entry(from.to_path_buf()).or_default();
        if targets.contains_key(to) {
            return false;
        }
        targets.insert(to.to_path_buf(), kind);
        self.reverse
            .entry(to.to_path_buf())
            .or_default()
            .insert(from.to_path_buf());
        true
    }

    pub fn remove_edge(&mut self, from: &Path, to: &Path) -> bool {
        let removed = match self.forward.get_mut(from) {
            Some(targets) => {
                let removed = targets.remove(to).is_some();
                if targets.is_empty() {
                    self.forward.remove(from);
                }
                removed
            }
            None => false,
        };
        if removed {
            if let Some(sources) = self.reverse.get_mut(to) {
                sources.remove(from);
                if sources.is_empty() {
                    self.reverse.remove(to);
                }
            }
        }
        removed
    }

    /// Replace every outgoing edge of `from` with `targets`.
    pub fn set_dependencies(
        &mut self,
        from: &Path,
        targets: &HashMap<PathBuf, EdgeKind>,
    ) -> GraphDelta {
        let current: HashSet<PathBuf> = self
            .forward
            .get(from)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();

        let mut delta = GraphDelta::default();
        for stale in current.iter().filter(|t| !targets.contains_key(*t)) {
            if self.remove_edge(from, stale) {
                delta.removed.push(stale.clone());
            }
        }
        for (target, kind) in targets {
            if !current.contains(target) && self.add_edge(from, target, *kind) {
                delta.added.push(target.clone());
            }
        }
        delta.added.sort();
        delta.removed.sort();
        delta
    }

    /// Drop every edge touching `file`.
    pub fn remove_file(&mut self, file: &Path) {
        let targets: Vec<PathBuf> = self
            .forward
            .get(file)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        for target in targets {
            self.remove_edge(file, &target);
        }
        let sources: Vec<PathBuf> = self
            .reverse
            .get(file)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for source in sources {
            self.remove_edge(&source, file);
        }
    }

    /// Direct dependencies of `file`, sorted.
    pub fn dependencies(&self, file: &Path) -> Vec<PathBuf> {
        let mut deps: Vec<PathBuf> = self
            .forward
            .get(file)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        deps.sort();
        deps
    }

    /// Direct dependents of `file`, sorted.
    pub fn dependents(&self, file: &Path) -> Vec<PathBuf> {
        let mut deps: Vec<PathBuf> = self
            .reverse
            .get(file)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        deps.sort();
        deps
    }

    pub fn edge_kind(&self, from: &Path, to: &Path) -> Option<EdgeKind> {
        self.forward.get(from).and_then(|t| t.get(to)).copied()
    }

    pub fn edge_count(&self) -> usize {
        self.forward.values().map(HashMap::len).sum()
    }

    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .forward
            .iter()
            .flat_map(|(from, targets)| {
                targets.iter().map(|(to, kind)| DependencyEdge {
                    from: from.clone(),
                    to: to.clone(),
                    kind: *kind,
                })
            })
            .collect();
        edges.sort();
        edges
    }

    /// Dependents of `start` grouped by distance, nearest first.
    ///
    /// Level 0 holds the direct dependents. `start` itself never appears
    /// and every file appears at most once, so cycles terminate.
    pub fn dependent_levels(&self, start: &Path, max_depth: usize) -> Vec<Vec<PathBuf>> {
        let mut levels = Vec::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        visited.insert(start.to_path_buf());
        let mut current = vec![start.to_path_buf()];

        while !current.is_empty() && levels.len() < max_depth {
            let mut next = Vec::new();
            for node in &current {
                for dependent in self.dependents(node) {
                    if visited.insert(dependent.clone()) {
                        next.push(dependent);
                    }
                }
            }
            next.sort();
            if next.is_empty() {
                break;
            }
            levels.push(next.clone());
            current = next;
        }

        levels
    }

    /// Strongly connected components with more than one file.
    pub fn find_cycles(&self) -> Vec<Vec<PathBuf>> {
        let mut nodes: Vec<&PathBuf> = self.forward.keys().collect();
        nodes.sort();

        let mut tarjan = Tarjan::default();
        for node in nodes {
            if !tarjan.index.contains_key(node) {
                tarjan.visit(self, node);
            }
        }

        let mut cycles: Vec<Vec<PathBuf>> = tarjan
            .components
            .into_iter()
            .filter(|c| c.len() > 1)
            .map(|mut c| {
                c.sort();
                c
            })
            .collect();
        cycles.sort();
        cycles
    }
}

#[derive(Default)]
struct Tarjan {
    counter: usize,
    index: HashMap<PathBuf, usize>,
    lowlink: HashMap<PathBuf, usize>,
    stack: Vec<PathBuf>,
    on_stack: HashSet<PathBuf>,
    components: Vec<Vec<PathBuf>>,
}

/// One node on the explicit DFS stack: its successors and the next to try.
struct Frame {
    node: PathBuf,
    successors: Vec<PathBuf>,
    next: usize,
}

impl Tarjan {
    /// Iterative so deep import chains cannot exhaust the thread stack.
    fn visit(&mut self, graph: &DependencyGraph, start: &Path) {
        let mut frames = vec![self.enter(graph, start.to_path_buf())];

        while let Some(frame) = frames.last_mut() {
            if let Some(next) = frame.successors.get(frame.next).cloned() {
                frame.next += 1;
                if !self.index.contains_key(&next) {
                    let child = self.enter(graph, next);
                    frames.push(child);
                } else if self.on_stack.contains(&next) {
                    let node = frame.node.clone();
                    let low = self.lowlink[&node].min(self.index[&next]);
                    self.lowlink.insert(node, low);
                }
                continue;
            }

            let Some(done) = frames.pop() else { break };
            if let Some(parent) = frames.last() {
                let low = self.lowlink[&parent.node].min(self.lowlink[&done.node]);
                self.lowlink.insert(parent.node.clone(), low);
            }
            if self.lowlink[&done.node] == self.index[&done.node] {
                let mut component = Vec::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack.remove(&member);
                    let last = member == done.node;
                    component.push(member);
                    if last {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }

    fn enter(&mut self, graph: &DependencyGraph, node: PathBuf) -> Frame {
        self.index.insert(node.clone(), self.counter);
        self.lowlink.insert(node.clone(), self.counter);
        self.counter += 1;
        self.stack.push(node.clone());
        self.on_stack.insert(node.clone());
        Frame {
            successors: graph.dependencies(&node),
            node,
            next: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_add_and_query() {
        let mut graph = DependencyGraph::new();
        assert!(graph.add_edge(&p("b.js"), &p("a.js"), EdgeKind::Import));
        assert!(!graph.add_edge(&p("b.js"), &p("a.js"), EdgeKind::Require));
        assert!(!graph.add_edge(&p("a.js"), &p("a.js"), EdgeKind::Import));
        graph.add_edge(&p("c.js"), &p("a.js"), EdgeKind::Require);

        assert_eq!(graph.dependents(&p("a.js")), vec![p("b.js"), p("c.js")]);
        assert_eq!(graph.dependencies(&p("b.js")), vec![p("a.js")]);
        assert_eq!(graph.edge_kind(&p("c.js"), &p("a.js")), Some(EdgeKind::Require));
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_set_dependencies_removes_stale_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p("b.js"), &p("a.js"), EdgeKind::Import);

        let mut targets = HashMap::new();
        targets.insert(p("c.js"), EdgeKind::Import);
        let delta = graph.set_dependencies(&p("b.js"), &targets);

        assert_eq!(delta.added, vec![p("c.js")]);
        assert_eq!(delta.removed, vec![p("a.js")]);
        assert!(graph.dependents(&p("a.js")).is_empty());
        assert_eq!(graph.dependents(&p("c.js")), vec![p("b.js")]);
    }

    #[test]
    fn test_remove_file() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p("b.js"), &p("a.js"), EdgeKind::Import);
        graph.add_edge(&p("a.js"), &p("z.js"), EdgeKind::Import);
        graph.remove_file(&p("a.js"));
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.dependencies(&p("b.js")).is_empty());
    }

    #[test]
    fn test_levels_terminate_on_cycles() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p("b"), &p("a"), EdgeKind::Import);
        graph.add_edge(&p("c"), &p("b"), EdgeKind::Import);
        graph.add_edge(&p("a"), &p("c"), EdgeKind::Import);
        graph.add_edge(&p("d"), &p("c"), EdgeKind::Import);

        let levels = graph.dependent_levels(&p("a"), 10);
        assert_eq!(levels, vec![vec![p("b")], vec![p("c")], vec![p("d")]]);
        assert_eq!(graph.dependent_levels(&p("a"), 1), vec![vec![p("b")]]);
    }

    #[test]
    fn test_find_cycles() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p("a"), &p("b"), EdgeKind::Import);
        graph.add_edge(&p("b"), &p("a"), EdgeKind::Import);
        graph.add_edge(&p("c"), &p("a"), EdgeKind::Import);
        assert_eq!(graph.find_cycles(), vec![vec![p("a"), p("b")]]);
    }

    #[test]
    fn test_find_cycles_on_deep_chain() {
        let mut graph = DependencyGraph::new();
        let files: Vec<PathBuf> = (0..20_000).map(|i| p(&format!("m{i:05}.js"))).collect();
        for pair in files.windows(2) {
            graph.add_edge(&pair[0], &pair[1], EdgeKind::Import);
        }
        assert!(graph.find_cycles().is_empty());

        graph.add_edge(&files[19_999], &files[19_997], EdgeKind::Import);
        assert_eq!(
            graph.find_cycles(),
            vec![vec![files[19_997].clone(), files[19_998].clone(), files[19_999].clone()]]
        );
    }
}
