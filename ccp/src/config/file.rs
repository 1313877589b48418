//! INI configuration file.
//!
//! ```ini
//! [client]
//! streams = 4
//! compressed = false
//!
//! [server]
//! port = 4567
//! root = /srv/files
//!
//! [logging]
//! level = info
//! ```
//!
//! Missing keys keep their defaults. Malformed values fail the load with the
//! section, key and value named.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{fs, io};

use ini::Ini;
use thiserror::Error;

use crate::client::{DEFAULT_BLOCK_SIZE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_STREAMS};
use crate::compress::{DEFAULT_COMPRESSION_LEVEL, DEFAULT_SPOOL_LIMIT};
use crate::server::{DEFAULT_ACCEPT_TIMEOUT, DEFAULT_MAX_STREAMS, DEFAULT_PORT};

/// Directory under the home directory holding the config file.
const CONFIG_DIR: &str = ".ccp";

/// Config file name.
const CONFIG_FILE: &str = "config.ini";

/// Errors loading or saving the config file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: ini::Error },

    #[error("failed to write config file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("invalid value '{value}' for {section}.{key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Default config file location: `~/.ccp/config.ini`.
pub fn config_file_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(CONFIG_FILE)
}

/// `[client]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub streams: usize,
    pub compressed: bool,
    pub decompress: bool,
    pub block_size: usize,
    /// Seconds; 0 disables the timeout.
    pub connect_timeout: u64,
    pub keep_partials: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            streams: DEFAULT_STREAMS,
            compressed: false,
            decompress: false,
            block_size: DEFAULT_BLOCK_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            keep_partials: false,
        }
    }
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Option<Duration> {
        seconds(self.connect_timeout)
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
    /// Unset means the working directory.
    pub root: Option<PathBuf>,
    pub max_streams: usize,
    /// Seconds; 0 disables the timeout.
    pub accept_timeout: u64,
    pub compression_level: u32,
    pub block_size: usize,
    pub spool_limit: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            root: None,
            max_streams: DEFAULT_MAX_STREAMS,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT.map_or(0, |t| t.as_secs()),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            block_size: DEFAULT_BLOCK_SIZE,
            spool_limit: DEFAULT_SPOOL_LIMIT,
        }
    }
}

impl ServerSettings {
    pub fn accept_timeout(&self) -> Option<Duration> {
        seconds(self.accept_timeout)
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
    /// Unset means no log file.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub client: ClientSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load from the default location; a missing file gives defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`; a missing file gives defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating its directory.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        let write_error = |source| ConfigFileError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        self.to_ini().write_to_file(path).map_err(write_error)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigFileError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("client")) {
            let c = &mut config.client;
            for (key, value) in section.iter() {
                match key {
                    "streams" => c.streams = parse("client", key, value)?,
                    "compressed" => c.compressed = parse_bool("client", key, value)?,
                    "decompress" => c.decompress = parse_bool("client", key, value)?,
                    "block_size" => c.block_size = parse("client", key, value)?,
                    "connect_timeout" => c.connect_timeout = parse("client", key, value)?,
                    "keep_partials" => c.keep_partials = parse_bool("client", key, value)?,
                    _ => {}
                }
            }
            if c.streams == 0 {
                return Err(invalid("client", "streams", "0", "must be at least 1"));
            }
        }

        if let Some(section) = ini.section(Some("server")) {
            let s = &mut config.server;
            for (key, value) in section.iter() {
                match key {
                    "bind" => s.bind = value.trim().to_string(),
                    "port" => s.port = parse("server", key, value)?,
                    "root" => s.root = optional_path(value),
                    "max_streams" => s.max_streams = parse("server", key, value)?,
                    "accept_timeout" => s.accept_timeout = parse("server", key, value)?,
                    "compression_level" => s.compression_level = parse("server", key, value)?,
                    "block_size" => s.block_size = parse("server", key, value)?,
                    "spool_limit" => s.spool_limit = parse("server", key, value)?,
                    _ => {}
                }
            }
            if s.compression_level > 9 {
                return Err(invalid(
                    "server",
                    "compression_level",
                    &s.compression_level.to_string(),
                    "must be between 0 and 9",
                ));
            }
        }

        if let Some(section) = ini.section(Some("logging")) {
            let l = &mut config.logging;
            for (key, value) in section.iter() {
                match key {
                    "level" => l.level = value.trim().to_string(),
                    "directory" => l.directory = optional_path(value),
                    _ => {}
                }
            }
        }

        Ok(config)
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        let c = &self.client;
        ini.with_section(Some("client"))
            .set("streams", c.streams.to_string())
            .set("compressed", c.compressed.to_string())
            .set("decompress", c.decompress.to_string())
            .set("block_size", c.block_size.to_string())
            .set("connect_timeout", c.connect_timeout.to_string())
            .set("keep_partials", c.keep_partials.to_string());

        let s = &self.server;
        let mut server = ini.with_section(Some("server"));
        server
            .set("bind", s.bind.clone())
            .set("port", s.port.to_string())
            .set("max_streams", s.max_streams.to_string())
            .set("accept_timeout", s.accept_timeout.to_string())
            .set("compression_level", s.compression_level.to_string())
            .set("block_size", s.block_size.to_string())
            .set("spool_limit", s.spool_limit.to_string());
        if let Some(root) = &s.root {
            server.set("root", root.to_string_lossy());
        }

        let mut logging = ini.with_section(Some("logging"));
        logging.set("level", self.logging.level.clone());
        if let Some(dir) = &self.logging.directory {
            logging.set("directory", dir.to_string_lossy());
        }

        ini
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn optional_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}

pub(super) fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

pub(super) fn parse<T>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(section, key, value, &e.to_string()))
}

pub(super) fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(section, key, value, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigFile::load_from(&dir.path().join("none.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.client.streams, 4);
        assert_eq!(config.server.port, 4567);
        assert_eq!(config.server.accept_timeout, 0);
        assert_eq!(config.server.accept_timeout(), None);
    }

    #[test]
    fn test_partial_file_overrides_some_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        fs::write(
            &path,
            "[client]\nstreams = 8\ncompressed = yes\n\n[server]\nroot = /srv\naccept_timeout = 45\n",
        )
        .unwrap();

        let config = ConfigFile::load_from(&path).unwrap();

        assert_eq!(config.client.streams, 8);
        assert!(config.client.compressed);
        assert!(!config.client.decompress);
        assert_eq!(config.server.root, Some(PathBuf::from("/srv")));
        assert_eq!(config.server.accept_timeout(), Some(Duration::from_secs(45)));
        assert_eq!(config.server.port, 4567);
    }

    #[test]
    fn test_invalid_value_names_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        fs::write(&path, "[server]\nport = lots\n").unwrap();

        let err = ConfigFile::load_from(&path).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("server.port"), "{}", message);
        assert!(message.contains("lots"), "{}", message);
    }

    #[test]
    fn test_zero_streams_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        fs::write(&path, "[client]\nstreams = 0\n").unwrap();
        assert!(matches!(
            ConfigFile::load_from(&path),
            Err(ConfigFileError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.client.keep_partials = true;
        config.server.root = Some(PathBuf::from("/data"));
        config.logging.directory = Some(PathBuf::from("/var/log/ccp"));
        config.save_to(&path).unwrap();

        assert_eq!(ConfigFile::load_from(&path).unwrap(), config);
    }
}
