//! # Logging Setup
//!
//! One `tracing` pipeline for every binary:
//! - `EnvFilter` from `RUST_LOG`, falling back to the configured level.
//! - A human-readable console layer.
//! - A JSON file layer through a daily rolling, non-blocking appender.
//!
//! The returned `WorkerGuard` flushes the file writer on drop and must be
//! held for as long as the process logs.

use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. Files are `<log_dir>/<app_name>.<date>`.
pub fn setup_logging(app_name: &str, log_dir: &Path, log_level: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let removed = cleanup_old_logs(log_dir, app_name, 1)?;

    let file_appender = rolling::daily(log_dir, app_name);
    let (writer, guard) = non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("Invalid log level {:?}", log_level))?;

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::info!(app = app_name, level = log_level, dir = %log_dir.display(), removed, "Logging initialized");
    Ok(guard)
}

/// Deletes `<app_name>.*` files in `log_dir` except the `keep` most recently
/// modified. Returns how many were removed. Files that cannot be removed are
/// reported and skipped.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> Result<usize> {
    let pattern = log_dir.join(format!("{}.*", glob::Pattern::escape(app_name)));
    let pattern = pattern.to_string_lossy();

    let mut entries: Vec<(PathBuf, SystemTime)> = glob::glob(&pattern)
        .with_context(|| format!("Invalid log glob {}", pattern))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (path, modified)
        })
        .collect();

    entries.sort_by_key(|(_, modified)| Reverse(*modified));

    let mut removed = 0;
    for (path, _) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(dir: &Path, name: &str, age_secs: u64) {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs)).unwrap();
    }

    #[test]
    fn keeps_only_the_newest_logs_of_the_app() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "pulse_watch.2026-10-17", 300);
        touch(dir.path(), "pulse_watch.2026-10-18", 200);
        touch(dir.path(), "pulse_watch.2026-10-19", 100);
        touch(dir.path(), "server_pulse.2026-10-17", 500);

        let removed = cleanup_old_logs(dir.path(), "pulse_watch", 1).unwrap();
        assert_eq!(removed, 2);
        assert!(dir.path().join("pulse_watch.2026-10-19").exists());
        assert!(!dir.path().join("pulse_watch.2026-10-17").exists());
        assert!(dir.path().join("server_pulse.2026-10-17").exists());
    }

    #[test]
    fn empty_directory_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_old_logs(dir.path(), "server_pulse", 1).unwrap(), 0);
    }
}
