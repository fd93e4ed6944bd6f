//! Tracing initialisation for fsrweb binaries.
//!
//! Log lines go to the console and, when a log file is given, to that file
//! as well (append mode, no ANSI colour). Call [`init_tracing`] once at
//! program start; subsequent calls are silently ignored because the global
//! subscriber can only be set once per process.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing::{warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json` — when `true`, the console layer emits newline-delimited JSON.
/// * `level` — default verbosity when `RUST_LOG` is not set.
/// * `log_file` — optional file that receives a plain-text copy of every
///   log line, appended across runs.
///
/// A log file that cannot be opened downgrades to console-only logging
/// with a warning; it never aborts startup.
pub fn init_tracing(json: bool, level: Level, log_file: Option<&Path>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let mut open_error = None;
    let file_writer = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(Arc::new(file)),
            Err(err) => {
                open_error = Some((path.to_path_buf(), err));
                None
            }
        }
    });
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .with(file_writer.map(|writer| {
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(writer)
            }))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .with(file_writer.map(|writer| {
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(writer)
            }))
            .try_init()
            .ok();
    }

    if let Some((path, err)) = open_error {
        warn!(path = %path.display(), error = %err, "could not open log file, logging to console only");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("install.log");

        init_tracing(false, Level::INFO, Some(&path));

        assert!(path.exists(), "log file should be created on init");
    }

    #[test]
    fn test_unopenable_log_file_does_not_panic() {
        init_tracing(false, Level::INFO, Some(Path::new("/nonexistent-dir/install.log")));
    }
}
