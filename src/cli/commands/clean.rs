//! Clean command - one garbage collection sweep.

use std::sync::Arc;

use anyhow::{Context, Result};

use super::Workspace;
use crate::cleaner::CacheCleaner;

pub fn run(workspace: &Workspace, all: bool) -> Result<()> {
    if all {
        let removed = workspace.store.clear().context("clearing cache")?;
        println!("Removed {} entries", removed.len());
        return Ok(());
    }

    let cleaner = CacheCleaner::new(Arc::clone(&workspace.store), &workspace.settings.cache);
    let report = cleaner.run_once().context("cleaning cache")?;
    println!(
        "Removed {} expired and {} least recently used entries ({} -> {} bytes)",
        report.expired.len(),
        report.lru_evicted.len(),
        report.bytes_before,
        report.bytes_after
    );
    Ok(())
}
