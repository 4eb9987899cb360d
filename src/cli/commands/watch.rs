//! Watch command - watcher, batch processor and cleaner until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;

use super::Workspace;
use crate::batch::BatchInvalidation;
use crate::change::ChangeSink;
use crate::cleaner::CacheCleaner;
use crate::config::CONFIG_DIR;
use crate::events::{CacheEvent, EventBus};
use crate::watcher::FileWatcher;

pub struct WatchArgs {
    pub debounce_ms: Option<u64>,
    pub window_ms: Option<u64>,
}

pub async fn run(workspace: Workspace, args: WatchArgs) -> Result<()> {
    let mut watcher_config = workspace.settings.watcher.clone();
    if let Some(debounce_ms) = args.debounce_ms {
        watcher_config.debounce_ms = debounce_ms;
    }
    let mut batch_config = workspace.settings.batch.clone();
    if let Some(window_ms) = args.window_ms {
        batch_config.window_ms = window_ms;
    }

    let events = EventBus::default();
    let mut rx = events.subscribe();

    let (tracker, stats) = workspace.scan()?;
    println!(
        "Dependency graph: {} files, {} edges ({}ms)",
        stats.files, stats.edges, stats.duration_ms
    );

    let engine = Arc::new(workspace.engine(Some(tracker), Some(events.clone())));
    let batch = BatchInvalidation::new(
        engine,
        Arc::clone(&workspace.parser),
        &batch_config,
        Some(events.clone()),
    );
    let sink: Arc<dyn ChangeSink> = Arc::new(batch.clone());
    let watcher = FileWatcher::new(Arc::clone(&workspace.keys), &watcher_config, events.clone())
        .with_sink(sink)
        .ignore_dir(workspace.cache_root())
        .ignore_dir(workspace.root.join(CONFIG_DIR));
    let cleaner = CacheCleaner::new(Arc::clone(&workspace.store), &workspace.settings.cache);

    let root = watcher
        .watch(&workspace.root)
        .with_context(|| format!("watching {}", workspace.root.display()))?;
    cleaner.start();
    println!(
        "Watching {} (debounce {}ms, {} batches every {}ms). Press Ctrl-C to stop.",
        root.display(),
        watcher_config.debounce_ms,
        batch_config.strategy,
        batch_config.window_ms
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = rx.recv() => match received {
                Ok(CacheEvent::WatchingStopped { root }) => {
                    println!("stopped watching {}", root.display());
                    if watcher.watched_roots().is_empty() {
                        break;
                    }
                }
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("[watch] output lagged, {skipped} events skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    watcher.stop_all();
    cleaner.stop();
    let reports = batch.shutdown();
    let flushed: usize = reports.iter().map(|r| r.processed).sum();
    let status = batch.get_batch_status();
    println!(
        "Shut down: {} batches, {} changes, {} keys removed ({flushed} flushed on exit)",
        status.total_batches, status.total_changes, status.total_keys_removed
    );
    Ok(())
}

fn print_event(event: &CacheEvent) {
    match event {
        CacheEvent::FileChanged { change, .. } => {
            println!("{:<8} {}", change.change_type.as_str(), change.file_path.display());
        }
        CacheEvent::FileRenamed { from, to, .. } => {
            println!("rename   {} -> {}", from.display(), to.display());
        }
        CacheEvent::CacheInvalidate {
            file_path,
            impact: Some(impact),
            keys_removed,
            ..
        } => {
            println!(
                "  invalidated {} ({impact}, {keys_removed} entries)",
                file_path.display()
            );
        }
        CacheEvent::BatchComplete {
            batch_id,
            changes,
            keys_removed,
            duration_ms,
        } => {
            println!(
                "batch #{batch_id}: {changes} changes, {keys_removed} entries evicted in {duration_ms}ms"
            );
        }
        CacheEvent::BatchError {
            batch_id,
            file_path,
            message,
        } => {
            eprintln!("batch #{batch_id}: {} failed: {message}", file_path.display());
        }
        CacheEvent::Error { message, .. } => eprintln!("error: {message}"),
        _ => {}
    }
}
