//! Structured logging for debugging taskweave.
//!
//! Log levels:
//! - ERROR: Critical failures that prevent a run from completing
//! - WARN: Unexpected conditions that are recoverable (task failures, bad plans)
//! - INFO: High-level run notifications (phases, waves, run outcome)
//! - DEBUG: Detailed operation traces (ready sets, model process lifecycle)
//! - TRACE: Very detailed traces (individual output chunks)
//!
//! Output goes to `~/.taskweave/taskweave.log`, truncated on startup, so it
//! never interleaves with the streamed answer on stdout. Debug mode can be
//! enabled with the `--debug` flag or `TASKWEAVE_DEBUG=1`; `RUST_LOG`
//! overrides both.

use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

const LOG_FILE: &str = "taskweave.log";

/// Check the `TASKWEAVE_DEBUG` environment variable.
pub fn env_debug() -> bool {
    std::env::var("TASKWEAVE_DEBUG")
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Default filter directive for the given mode.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "taskweave=debug"
    } else {
        "taskweave=info"
    }
}

/// Initialize logging with explicit debug mode setting.
///
/// Logging is best effort: without a home directory, or if a subscriber is
/// already installed, this does nothing.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let Some(dir) = dirs::home_dir().map(|h| h.join(".taskweave")) else {
        return;
    };
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let path = dir.join(LOG_FILE);
    // Truncate file on startup
    let _ = std::fs::write(&path, "");

    let appender = tracing_appender::rolling::never(&dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .try_init()
        .is_ok();

    if installed {
        let _ = LOG_GUARD.set(guard);
        let _ = LOG_PATH.set(path);
    }
}

/// Path of the active log file, if logging was initialized.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}
