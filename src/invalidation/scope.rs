use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::strategy::StrategyParams;
use crate::dependency::DependencyTracker;

/// Files selected for eviction by one invalidation decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationScope {
    pub direct: Vec<PathBuf>,
    pub dependents: Vec<PathBuf>,
    pub transitive: Vec<PathBuf>,
    pub test_files: Vec<PathBuf>,
    /// Size of the deduplicated union of all four lists.
    pub total: usize,
}

impl InvalidationScope {
    /// Every file in scope, deduplicated, in category order.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.direct
            .iter()
            .chain(&self.dependents)
            .chain(&self.transitive)
            .chain(&self.test_files)
            .filter(|p| seen.insert(*p))
            .cloned()
            .collect()
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.direct
            .iter()
            .chain(&self.dependents)
            .chain(&self.transitive)
            .chain(&self.test_files)
            .any(|p| p == file)
    }

    fn recount(&mut self) {
        self.total = self.files().len();
    }

    /// Union of two scopes, keeping each file in its first category.
    pub fn merge(&mut self, other: &InvalidationScope) {
        let push = |list: &mut Vec<PathBuf>, items: &[PathBuf], scope: &InvalidationScope| {
            for item in items {
                if !scope.contains(item) && !list.contains(item) {
                    list.push(item.clone());
                }
            }
        };
        let snapshot = self.clone();
        push(&mut self.direct, &other.direct, &snapshot);
        push(&mut self.dependents, &other.dependents, &snapshot);
        push(&mut self.transitive, &other.transitive, &snapshot);
        push(&mut self.test_files, &other.test_files, &snapshot);
        self.recount();
    }

    /// Compute the scope of a change to `direct` files, anchored at
    /// `origin` for dependency lookups.
    pub fn compute(
        tracker: &DependencyTracker,
        origin: &Path,
        direct: Vec<PathBuf>,
        params: &StrategyParams,
    ) -> Self {
        let mut scope = InvalidationScope {
            direct,
            ..Default::default()
        };
        let mut visited: HashSet<PathBuf> = scope.direct.iter().cloned().collect();
        visited.insert(origin.to_path_buf());

        for dependent in tracker.get_dependents(origin) {
            if visited.contains(&dependent) {
                continue;
            }
            let accepted = params.include_all_direct
                || tracker.calculate_impact_score(&dependent) >= params.impact_threshold;
            if accepted {
                visited.insert(dependent.clone());
                scope.dependents.push(dependent);
            }
        }

        if params.include_transitive {
            let mut frontier = scope.dependents.clone();
            // Direct dependents sit at depth 1.
            for _ in 1..params.max_depth {
                let mut next = Vec::new();
                for file in &frontier {
                    for dependent in tracker.get_dependents(file) {
                        if visited.insert(dependent.clone()) {
                            next.push(dependent);
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                next.sort();
                scope.transitive.extend(next.iter().cloned());
                frontier = next;
            }
        }

        if params.include_test_files {
            let in_scope: Vec<PathBuf> = scope
                .direct
                .iter()
                .chain(&scope.dependents)
                .chain(&scope.transitive)
                .cloned()
                .collect();
            let mut tests = Vec::new();
            for file in std::iter::once(origin.to_path_buf()).chain(in_scope) {
                for test in tracker.related_test_files(&file) {
                    if visited.insert(test.clone()) {
                        tests.push(test);
                    }
                }
            }
            tests.sort();
            scope.test_files = tests;
        }

        scope.recount();
        scope
    }
}
