//! Key command - show where a file is cached.

use std::path::Path;

use anyhow::Result;

use super::Workspace;

pub fn run(workspace: &Workspace, file: &Path, commit: Option<&str>) -> Result<()> {
    let absolute = workspace.absolute(file);
    let Some(key) = workspace
        .keys
        .generate_key(&absolute, &workspace.root, &workspace.branch, commit)
    else {
        println!("{} is not cacheable (excluded, ignored or unsupported)", file.display());
        return Ok(());
    };

    let cached = workspace.store.peek(&key.to_string()).is_some();
    println!("{key}");
    println!("  language: {}", key.language);
    println!("  branch:   {}", key.branch);
    println!("  hash:     {}", key.hash);
    println!("  path:     {}", key.relative_path);
    println!("  stored:   {}", key.storage_path(&workspace.cache_root()).display());
    println!("  cached:   {}", if cached { "yes" } else { "no" });
    Ok(())
}
