//! Init and Config commands.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::{ConfigError, Settings};

/// Create `.astcache/settings.toml` in `workspace`.
pub fn run_init(workspace: &Path, force: bool) -> Result<()> {
    match Settings::init_config_file(workspace, force) {
        Ok(path) => {
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
            Ok(())
        }
        Err(ConfigError::AlreadyExists(path)) => {
            anyhow::bail!(
                "configuration file already exists at {} (use --force to overwrite)",
                path.display()
            )
        }
        Err(e) => Err(e).context("writing configuration"),
    }
}

/// Print the effective configuration as TOML.
pub fn run_config(config: &Settings) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("rendering configuration")?;
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        run_init(dir.path(), false).unwrap();
        assert!(dir.path().join(".astcache/settings.toml").is_file());

        let err = run_init(dir.path(), false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        run_init(dir.path(), true).unwrap();
    }
}
