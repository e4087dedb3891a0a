//! Tracing subscriber setup for the CLI.
//!
//! Console output goes to stderr so stdout stays free for command output.
//! `RUST_LOG`, when set, takes precedence over the configured level.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Prefix of the daily log files, e.g. `weekly-merge.2025-01-06.log`.
pub const LOG_FILE_PREFIX: &str = "weekly-merge";

/// Options resolved from [`crate::config::MergeConfig`].
#[derive(Debug, Clone, Default)]
pub struct LogOptions<'a> {
    pub level: &'a str,
    pub json: bool,
    pub directory: Option<&'a Path>,
}

/// Build the level filter: `RUST_LOG` if valid, else the configured level.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the global subscriber.
///
/// When a log directory is configured the returned guard flushes the file
/// writer on drop and must be held for the life of the process.
pub fn init_logging(options: &LogOptions<'_>) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    if options.json {
        layers.push(console.json().boxed());
    } else {
        layers.push(console.boxed());
    }

    let mut guard = None;
    if let Some(dir) = options.directory {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(dir)
            .with_context(|| format!("Failed to open log file in {}", dir.display()))?;
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(options.level))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_falls_back_on_garbage() {
        // Neither path may panic, whatever RUST_LOG holds in the test env.
        let _ = env_filter("debug");
        let _ = env_filter("not a [valid filter");
    }

    #[test]
    fn test_default_options() {
        let options = LogOptions::default();
        assert!(!options.json);
        assert!(options.directory.is_none());
    }
}
