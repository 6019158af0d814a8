//! Subscriber setup for embedders that do not install their own.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Prefix of the daily log files; the appender adds the date suffix.
pub const LOG_FILE_PREFIX: &str = "tutor-engine.log";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("failed to create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Flushes the non-blocking file writer on drop.
#[derive(Debug)]
pub struct FileLogGuard {
    _guard: WorkerGuard,
    directory: PathBuf,
}

impl FileLogGuard {
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// Installs the global subscriber described by `config`.
///
/// Returns the file guard when file logging is on. A second call in the same
/// process fails with [`LoggingError::AlreadyInstalled`].
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<FileLogGuard>, LoggingError> {
    let env_filter = EnvFilter::try_new(config.level.trim())?;
    let stdout_layer = fmt::layer().with_target(true);

    if !config.file_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .try_init()?;
        return Ok(None);
    }

    let directory = PathBuf::from(&config.log_dir);
    std::fs::create_dir_all(&directory).map_err(|source| LoggingError::LogDir {
        path: directory.clone(),
        source,
    })?;

    let appender = RollingFileAppender::new(Rotation::DAILY, &directory, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        level = %config.level,
        directory = %directory.display(),
        "file logging enabled"
    );
    Ok(Some(FileLogGuard {
        _guard: guard,
        directory,
    }))
}
