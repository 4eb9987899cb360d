//! Reverse dependency graph between project files.
//!
//! Edges point from a dependent to its dependency. The tracker resolves
//! parser-reported imports against the known file set, keeps test-file
//! edges apart from production edges, and answers "who is affected if this
//! file changes".

mod error;
pub mod graph;
pub mod resolver;
mod tracker;

pub use error::{DependencyError, DependencyResult};
pub use graph::{DependencyEdge, DependencyGraph, EdgeKind, GraphDelta};
pub use resolver::ImportResolver;
pub use tracker::{BuildStats, DependencyTracker, FileImports, SharedDependencyTracker, TrackerOptions};
