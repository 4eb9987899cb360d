//! Invalidate command - classify one change and evict its scope.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::Workspace;
use crate::change::ChangeEvent;
use crate::cli::args::ChangeKind;
use crate::invalidation::{
    ChangeImpact, InvalidationOptions, InvalidationOutcome, InvalidationStrategy,
};

pub struct InvalidateArgs {
    pub file: PathBuf,
    pub kind: ChangeKind,
    pub old: Option<PathBuf>,
    pub from: Option<PathBuf>,
    pub strategy: Option<InvalidationStrategy>,
    pub dry_run: bool,
}

pub fn run(workspace: &Workspace, args: InvalidateArgs) -> Result<()> {
    let event = change_event(workspace, &args)?;
    let strategy = args.strategy.unwrap_or(workspace.settings.invalidation.strategy);

    let tracker = if strategy == InvalidationStrategy::Immediate {
        None
    } else {
        Some(workspace.scan()?.0)
    };
    let engine = workspace.engine(tracker, None);
    let options = InvalidationOptions {
        strategy: Some(strategy),
        dry_run: args.dry_run,
        branch: None,
    };
    let outcome = engine
        .invalidate_by_change(&event, &options)
        .with_context(|| format!("invalidating {}", args.file.display()))?;

    print_outcome(&outcome);
    Ok(())
}

fn change_event(workspace: &Workspace, args: &InvalidateArgs) -> Result<ChangeEvent> {
    let path = workspace.absolute(&args.file);
    let old = args.old.as_deref().map(read).transpose()?;

    let event = match args.kind {
        ChangeKind::Add => ChangeEvent::added(path.clone(), Some(read(&path)?)),
        ChangeKind::Modify => ChangeEvent::modified(path.clone(), old, Some(read(&path)?)),
        ChangeKind::Delete => ChangeEvent::deleted(path, old),
        ChangeKind::Rename => {
            let from = args
                .from
                .as_deref()
                .map(|from| workspace.absolute(from))
                .context("--from is required for renames")?;
            ChangeEvent::renamed(from, path.clone(), Some(read(&path)?))
        }
    };
    Ok(event)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn print_outcome(outcome: &InvalidationOutcome) {
    println!(
        "{}: {} impact ({}), strategy {}",
        outcome.file_path.display(),
        outcome.impact,
        outcome.reason,
        outcome.strategy
    );

    match &outcome.scope {
        Some(scope) => {
            println!("  scope: {} files", scope.total);
            for file in scope.files() {
                println!("    {}", file.display());
            }
        }
        None if outcome.impact == ChangeImpact::None => println!("  nothing to invalidate"),
        None => println!("  entire cache"),
    }

    if outcome.dry_run {
        println!("  dry run, nothing evicted");
    } else {
        println!("  evicted {} entries", outcome.invalidated.len());
    }
    for failure in &outcome.failures {
        eprintln!(
            "  failed to evict {}: {}",
            failure.file_path.display(),
            failure.message
        );
    }
}
