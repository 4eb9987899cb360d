//! Graph command - dependency graph summary and per-file impact.

use std::path::{Path, PathBuf};

use anyhow::Result;

use super::Workspace;

pub fn run(workspace: &Workspace, file: Option<&Path>, cycles: bool) -> Result<()> {
    let (tracker, stats) = workspace.scan()?;
    println!(
        "{} files, {} edges, {} test edges, {} unresolved imports ({}ms)",
        stats.files, stats.edges, stats.test_edges, stats.unresolved, stats.duration_ms
    );

    if cycles {
        let tracker = tracker.read();
        let found = tracker.detect_cycles();
        if found.is_empty() {
            println!("No import cycles");
        }
        for cycle in found {
            println!("cycle: {}", join(&cycle, " -> "));
        }
    }

    let Some(file) = file else {
        return Ok(());
    };
    let absolute = workspace.absolute(file);
    let tracker = tracker.read();
    let relative = tracker.relative(&absolute);
    if !tracker.contains(&relative) {
        println!("{} is not part of the graph", relative.display());
        return Ok(());
    }

    let max_depth = workspace.settings.invalidation.max_depth;
    println!("{}", relative.display());
    println!("  impact score: {:.3}", tracker.calculate_impact_score(&relative));
    println!("  imports:      {}", join(&tracker.get_dependencies(&relative), ", "));
    println!("  imported by:  {}", join(&tracker.get_dependents(&relative), ", "));
    for (depth, level) in tracker.dependent_levels(&relative, max_depth).iter().enumerate() {
        println!("  depth {}:      {}", depth + 1, join(level, ", "));
    }
    println!("  tests:        {}", join(&tracker.related_test_files(&relative), ", "));
    Ok(())
}

fn join(paths: &[PathBuf], separator: &str) -> String {
    if paths.is_empty() {
        return "-".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(separator)
}
