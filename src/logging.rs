//! Unified logging for scheduler and CLI output.
//!
//! Provides compact timestamped logging with per-target level configuration.
//! Supports `RUST_LOG` environment variable for runtime overrides.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"      # quiet by default
//!
//! [logging.modules]
//! scheduler = "debug"   # per-file dispatch decisions
//! budget = "trace"      # memory gate waits
//! ```
//!
//! # Environment Variable
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug cindex index src
//! RUST_LOG=scheduler=debug,loader=trace cindex index .
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Build the filter directive string from config: `default,target=level,...`
fn filter_directives(config: &LoggingConfig) -> String {
    let mut filter_str = config.default.clone();
    for (module, level) in &config.modules {
        filter_str.push_str(&format!(",{module}={level}"));
    }
    filter_str
}

/// Initialize logging with configuration.
///
/// Call once at startup. Safe to call multiple times (only first call takes effect).
/// The `RUST_LOG` environment variable takes precedence over config settings.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        // Logs go to stderr so progress bars and JSON output on stdout stay clean
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        // A global subscriber may already be installed by an embedding application
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

/// Initialize logging with default configuration (`default = "warn"`).
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log an event with the component as its tracing target, so
/// `[logging.modules]` levels and `RUST_LOG` directives apply per component.
///
/// # Examples
/// ```ignore
/// log_event!("scheduler", "job registered", "{} files", 42);
/// log_event!("cli", "done");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:literal, $event:expr) => {
        tracing::info!(target: $component, "{}", $event)
    };
    ($component:literal, $event:expr, $($arg:tt)*) => {
        tracing::info!(target: $component, "{}: {}", $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("scheduler", "worker exit", "{}", name);
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:literal, $event:expr) => {
        tracing::debug!(target: $component, "{}", $event)
    };
    ($component:literal, $event:expr, $($arg:tt)*) => {
        tracing::debug!(target: $component, "{}: {}", $event, format!($($arg)*))
    };
}
