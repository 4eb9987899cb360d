//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand, ValueEnum,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::invalidation::InvalidationStrategy;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// AST cache with dependency-aware invalidation
#[derive(Parser)]
#[command(
    name = "astcache",
    version = env!("CARGO_PKG_VERSION"),
    about = "AST parse-result cache with smart invalidation",
    long_about = "Cache parse results by content and invalidate them along the dependency graph.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ astcache init\n  $ astcache graph\n  $ astcache invalidate src/utils/math.js --old math.js.orig --dry-run\n  $ astcache watch"
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Branch used in cache keys (defaults to the checked out git branch)
    #[arg(short, long, global = true, env = "ASTCACHE_BRANCH")]
    pub branch: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .astcache directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,

    /// Print the cache key for a file
    #[command(about = "Show the cache key a file is stored under")]
    Key {
        /// Source file
        file: PathBuf,

        /// Use a commit hash instead of the content hash
        #[arg(long)]
        commit: Option<String>,
    },

    /// Cache statistics
    #[command(about = "Show entry counts, size and hit rate")]
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Garbage-collect the cache
    #[command(about = "Evict expired entries and enforce the size limit")]
    Clean {
        /// Remove every entry
        #[arg(long)]
        all: bool,
    },

    /// Inspect the dependency graph
    #[command(
        about = "Build the dependency graph and show impact",
        after_help = "Examples:\n  astcache graph\n  astcache graph src/utils/math.js\n  astcache graph --cycles"
    )]
    Graph {
        /// Show dependents, dependencies and impact of one file
        file: Option<PathBuf>,

        /// List import cycles
        #[arg(long)]
        cycles: bool,
    },

    /// Invalidate the cache for a changed file
    #[command(
        about = "Classify a change and evict what it affects",
        after_help = "The new content is read from FILE. Pass --old with a copy of the\nprevious version to let the classifier compare the two."
    )]
    Invalidate {
        /// Changed file
        file: PathBuf,

        /// Kind of change
        #[arg(long, value_enum, default_value_t = ChangeKind::Modify)]
        kind: ChangeKind,

        /// File holding the previous content
        #[arg(long)]
        old: Option<PathBuf>,

        /// Previous path, for renames
        #[arg(long, required_if_eq("kind", "rename"))]
        from: Option<PathBuf>,

        /// Override the configured strategy
        #[arg(short, long)]
        strategy: Option<InvalidationStrategy>,

        /// Compute the scope without evicting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Watch the project and invalidate on change
    #[command(about = "Watch files and invalidate in batches until Ctrl-C")]
    Watch {
        /// Override the debounce window in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Override the batch window in milliseconds
        #[arg(long)]
        window_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
    Rename,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_invalidate() {
        let cli = Cli::try_parse_from([
            "astcache",
            "invalidate",
            "src/a.js",
            "--strategy",
            "aggressive",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::Invalidate {
                file,
                kind,
                strategy,
                dry_run,
                ..
            } => {
                assert_eq!(file, PathBuf::from("src/a.js"));
                assert_eq!(kind, ChangeKind::Modify);
                assert_eq!(strategy, Some(InvalidationStrategy::Aggressive));
                assert!(dry_run);
            }
            _ => panic!("expected invalidate"),
        }
    }

    #[test]
    fn test_rename_requires_from() {
        assert!(Cli::try_parse_from(["astcache", "invalidate", "b.js", "--kind", "rename"]).is_err());
        assert!(
            Cli::try_parse_from([
                "astcache", "invalidate", "b.js", "--kind", "rename", "--from", "a.js"
            ])
            .is_ok()
        );
    }
}
