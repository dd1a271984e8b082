//! Tracing subscriber setup
//!
//! Console output always; a daily rolling file when a usable log directory is
//! given. The level comes from `RUST_LOG` and defaults to `info`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// File name prefix for rolled log files
pub const LOG_FILE_PREFIX: &str = "downlink-ingest.log";

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Keeps the non-blocking file writer flushing for the life of the process
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

static LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Install the global subscriber.
///
/// Returns `false` if logging was already initialized, by this function or by
/// someone else. A log directory that cannot be created is reported on stderr
/// and logging falls back to the console.
pub fn init_logging(log_directory: Option<&Path>) -> bool {
    if LOGGING_INITIALIZED.swap(true, Ordering::AcqRel) {
        return false;
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_directory = log_directory.and_then(usable_log_directory);
    let file_layer = match log_directory {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            LOG_GUARD.set(guard).ok();
            LOG_DIR.set(dir.to_path_buf()).ok();
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_thread_names(true)
                    .with_writer(non_blocking),
            )
        }
        None => None,
    };

    let console_layer = fmt::layer().with_target(false).with_thread_names(true);

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if !installed {
        return false;
    }

    install_panic_hook();
    match log_directory {
        Some(dir) => tracing::info!("Telemetry ingest logging to {}", dir.display()),
        None => tracing::info!("Telemetry ingest logging to console only"),
    }
    true
}

/// `dir`, created if missing, or `None` if it cannot be
fn usable_log_directory(dir: &Path) -> Option<&Path> {
    match std::fs::create_dir_all(dir) {
        Ok(()) => Some(dir),
        Err(e) => {
            eprintln!("Failed to create log directory {}: {}", dir.display(), e);
            None
        }
    }
}

/// Directory given to [`init_logging`], if any
pub fn log_directory() -> Option<&'static Path> {
    LOG_DIR.get().map(PathBuf::as_path)
}

/// Route panics through tracing before the default hook runs
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("<unnamed>");
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        tracing::error!("Panic in thread '{}' at {}: {}", name, location, message);
        default_hook(info);
    }));
}
