use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use astcache::cli::commands::{self, Workspace, invalidate::InvalidateArgs, watch::WatchArgs};
use astcache::cli::{Cli, Commands};
use astcache::config::Settings;
use astcache::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => {
            let mut settings = Settings::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?;
            if settings.workspace_root.is_none() {
                settings.workspace_root = Settings::workspace_root();
            }
            settings
        }
        None => Settings::load_or_default(),
    };
    logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => {
            let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            commands::init::run_init(&workspace, force)
        }
        Commands::Config => commands::init::run_config(&settings),
        Commands::Key { file, commit } => {
            let workspace = Workspace::open(settings, cli.branch)?;
            commands::key::run(&workspace, &file, commit.as_deref())
        }
        Commands::Stats { json } => {
            let workspace = Workspace::open(settings, cli.branch)?;
            commands::stats::run(&workspace, json)
        }
        Commands::Clean { all } => {
            let workspace = Workspace::open(settings, cli.branch)?;
            commands::clean::run(&workspace, all)
        }
        Commands::Graph { file, cycles } => {
            let workspace = Workspace::open(settings, cli.branch)?;
            commands::graph::run(&workspace, file.as_deref(), cycles)
        }
        Commands::Invalidate {
            file,
            kind,
            old,
            from,
            strategy,
            dry_run,
        } => {
            let workspace = Workspace::open(settings, cli.branch)?;
            commands::invalidate::run(
                &workspace,
                InvalidateArgs {
                    file,
                    kind,
                    old,
                    from,
                    strategy,
                    dry_run,
                },
            )
        }
        Commands::Watch {
            debounce_ms,
            window_ms,
        } => {
            let workspace = Workspace::open(settings, cli.branch)?;
            commands::watch::run(
                workspace,
                WatchArgs {
                    debounce_ms,
                    window_ms,
                },
            )
            .await
        }
    }
}
