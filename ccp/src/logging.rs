//! Process-wide logging setup.
//!
//! Called once by the binary at startup. Library components only emit
//! `tracing` events and never install a subscriber themselves.
//!
//! Output goes to stderr and, when a directory is configured, to a daily
//! rolling file written through a non-blocking appender. `RUST_LOG`
//! overrides the configured level; `debug` overrides both.

use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Default log file prefix.
pub const DEFAULT_FILE_PREFIX: &str = "ccp.log";

/// Errors installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("failed to create log directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `ccp=debug`.
    pub level: String,
    /// Forces `debug` regardless of `level`.
    pub debug: bool,
    /// Directory for the rolling log file; None logs to stderr only.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
            directory: None,
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_directory(mut self, directory: Option<PathBuf>) -> Self {
        self.directory = directory;
        self
    }

    /// Filter directive after applying `debug`.
    pub fn effective_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.level
        }
    }

    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        self.filter_with_env(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
    }

    fn filter_with_env(&self, env: Option<&str>) -> Result<EnvFilter, LoggingError> {
        if !self.debug {
            if let Some(filter) = env.and_then(|env| EnvFilter::try_new(env).ok()) {
                return Ok(filter);
            }
        }
        let directive = self.effective_level();
        EnvFilter::try_new(directive).map_err(|e| LoggingError::InvalidFilter {
            filter: directive.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Keeps the file appender flushing. Hold it until the process exits.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(config.debug)
        .with_filter(config.filter()?);

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::Directory {
                path: dir.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .with_filter(config.filter()?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_overrides_level() {
        let config = LoggingConfig::default().with_level("warn");
        assert_eq!(config.effective_level(), "warn");
        assert_eq!(config.with_debug(true).effective_level(), "debug");
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LoggingConfig::default().with_level("ccp=notalevel");
        assert!(matches!(
            config.filter_with_env(None),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_env_overrides_level_but_not_debug() {
        let config = LoggingConfig::default().with_level("info");
        let filter = config.filter_with_env(Some("warn")).unwrap();
        assert_eq!(filter.to_string(), "warn");

        let filter = config
            .with_debug(true)
            .filter_with_env(Some("warn"))
            .unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.directory.is_none());
        assert_eq!(config.file_prefix, "ccp.log");
    }
}
