//! Configuration file handling.
//!
//! Settings live in `~/.ccp/config.ini`. Command-line arguments take
//! precedence over the file, which takes precedence over built-in defaults.

mod file;
mod keys;
mod size;

pub use file::{
    config_file_path, ClientSettings, ConfigFile, ConfigFileError, LoggingSettings, ServerSettings,
};
pub use keys::ConfigKey;
pub use size::format_size;
