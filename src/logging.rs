//! Compact timestamped logging with per-module levels.
//!
//! Log lines go to stderr so command output on stdout stays machine
//! readable. Component names (`store`, `deps`, `invalidation`, `batch`,
//! `watcher`, `cleaner`) appear in brackets at the start of each message.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! astcache::batch = "debug"
//! ```
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=astcache=debug astcache watch
//! ```

use std::sync::Once;

use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter directive built from config: the default level followed by
/// `module=level` overrides in name order.
pub fn filter_directive(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();

    let mut directive = config.default.clone();
    for (module, level) in modules {
        directive.push_str(&format!(",{module}={level}"));
    }
    directive
}

/// Install the global subscriber. Only the first call takes effect.
///
/// An unparsable directive falls back to `warn`.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            let directive = filter_directive(config);
            EnvFilter::try_new(&directive).unwrap_or_else(|e| {
                eprintln!("invalid logging directive '{directive}': {e}");
                EnvFilter::new("warn")
            })
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Initialize with `LoggingConfig::default()` (quiet, warnings only).
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Info-level event tagged with a component.
///
/// ```ignore
/// log_event!("store", "opened", "{} entries", count);
/// log_event!("watcher", "started");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-level counterpart of [`log_event!`].
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_filter_directive_orders_modules() {
        let config = LoggingConfig {
            default: "info".to_string(),
            modules: HashMap::from([
                ("watcher".to_string(), "trace".to_string()),
                ("batch".to_string(), "debug".to_string()),
            ]),
        };
        assert_eq!(filter_directive(&config), "info,batch=debug,watcher=trace");
    }

    #[test]
    fn test_default_directive() {
        assert_eq!(filter_directive(&LoggingConfig::default()), "warn");
    }
}
