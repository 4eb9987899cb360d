//! Stats command.

use std::collections::BTreeMap;

use anyhow::{Context, Result};

use super::Workspace;

pub fn run(workspace: &Workspace, json: bool) -> Result<()> {
    let stats = workspace.store.stats();

    if json {
        let rendered = serde_json::to_string_pretty(&stats).context("rendering stats")?;
        println!("{rendered}");
        return Ok(());
    }

    let mut per_language: BTreeMap<String, (usize, u64)> = BTreeMap::new();
    for entry in workspace.store.entries() {
        let slot = per_language.entry(entry.key.language.to_string()).or_default();
        slot.0 += 1;
        slot.1 += entry.size;
    }

    println!("Cache: {}", workspace.cache_root().display());
    println!("  entries:     {}", stats.entries);
    println!("  total size:  {} bytes", stats.total_bytes);
    for (language, (count, bytes)) in per_language {
        println!("    {language:<12} {count:>6} entries {bytes:>10} bytes");
    }
    Ok(())
}
