//! Shared command setup: configuration and logging.

use std::path::{Path, PathBuf};

use ccp::config::{config_file_path, ConfigFile};
use ccp::logging::{init_logging, LoggingConfig, LoggingGuard};
use tracing::{debug, info};

use crate::error::CliError;

/// Global options every command receives.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub debug: bool,
    pub config: Option<PathBuf>,
}

/// Loaded configuration plus the logging guard for the process lifetime.
pub struct CliRunner {
    config: ConfigFile,
    config_path: PathBuf,
    _logging: LoggingGuard,
}

impl CliRunner {
    /// Load the config file and install logging.
    pub fn new(global: &GlobalArgs) -> Result<Self, CliError> {
        let config_path = global.config.clone().unwrap_or_else(config_file_path);
        let config = load_config(&config_path)?;

        let logging = LoggingConfig::default()
            .with_level(config.logging.level.clone())
            .with_debug(global.debug)
            .with_directory(config.logging.directory.clone());
        let guard = init_logging(&logging)?;

        debug!(path = %config_path.display(), "Configuration loaded");

        Ok(Self {
            config,
            config_path,
            _logging: guard,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn log_startup(&self, command: &str) {
        info!(version = ccp::VERSION, command, "ccp starting");
    }
}

/// Load `path`, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<ConfigFile, CliError> {
    Ok(ConfigFile::load_from(path)?)
}
