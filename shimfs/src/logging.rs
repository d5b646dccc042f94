//! Logging for the shimfs daemon.
//!
//! Records go to a per-run log file and to stderr, filtered through
//! RUST_LOG (default `info`). The file is truncated on startup: mount
//! state does not survive a daemon restart, so entries from a previous
//! run would only mislead whoever is tailing the log.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the background log writer alive.
///
/// Hold this for the lifetime of the daemon; dropping it flushes any
/// buffered records before the file writer shuts down.
pub struct LoggingGuard {
    _writer_guard: WorkerGuard,
}

/// Create the log directory and truncate any log file left by a previous
/// run.
fn prepare_log_file(log_dir: &Path, log_file: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;

    let path = log_dir.join(log_file);
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    Ok(path)
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Fails if the log directory cannot be created, the log file cannot be
/// truncated, or a subscriber is already installed for this process.
pub fn init_logging(log_dir: &str, log_file: &str) -> io::Result<LoggingGuard> {
    prepare_log_file(Path::new(log_dir), log_file)?;

    let (file_writer, writer_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, log_file));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_writer(io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .map_err(io::Error::other)?;

    Ok(LoggingGuard {
        _writer_guard: writer_guard,
    })
}
