//! File watching with per-path debouncing.
//!
//! ```text
//! notify (per root) --> RootWorker --> WatchFilter --> Debouncer
//!                                                         |
//!                            EventBus <-- classify (add/modify/delete/rename)
//!                                                         |
//!                                                    ChangeSink (batch)
//! ```

mod debouncer;
mod error;
mod file_watcher;
mod filter;
mod root;

pub use debouncer::Debouncer;
pub use error::WatchError;
pub use file_watcher::FileWatcher;
pub use filter::WatchFilter;
