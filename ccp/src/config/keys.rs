//! Typed `section.key` names for `ccp config get/set`.

use std::path::PathBuf;
use std::str::FromStr;

use super::file::{invalid, parse, parse_bool, ConfigFile, ConfigFileError};

/// A settable configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    ClientStreams,
    ClientCompressed,
    ClientDecompress,
    ClientBlockSize,
    ClientConnectTimeout,
    ClientKeepPartials,
    ServerBind,
    ServerPort,
    ServerRoot,
    ServerMaxStreams,
    ServerAcceptTimeout,
    ServerCompressionLevel,
    ServerBlockSize,
    ServerSpoolLimit,
    LoggingLevel,
    LoggingDirectory,
}

const ALL_KEYS: [ConfigKey; 16] = [
    ConfigKey::ClientStreams,
    ConfigKey::ClientCompressed,
    ConfigKey::ClientDecompress,
    ConfigKey::ClientBlockSize,
    ConfigKey::ClientConnectTimeout,
    ConfigKey::ClientKeepPartials,
    ConfigKey::ServerBind,
    ConfigKey::ServerPort,
    ConfigKey::ServerRoot,
    ConfigKey::ServerMaxStreams,
    ConfigKey::ServerAcceptTimeout,
    ConfigKey::ServerCompressionLevel,
    ConfigKey::ServerBlockSize,
    ConfigKey::ServerSpoolLimit,
    ConfigKey::LoggingLevel,
    ConfigKey::LoggingDirectory,
];

impl ConfigKey {
    /// Every key, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        &ALL_KEYS
    }

    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::ClientStreams
            | ConfigKey::ClientCompressed
            | ConfigKey::ClientDecompress
            | ConfigKey::ClientBlockSize
            | ConfigKey::ClientConnectTimeout
            | ConfigKey::ClientKeepPartials => "client",
            ConfigKey::ServerBind
            | ConfigKey::ServerPort
            | ConfigKey::ServerRoot
            | ConfigKey::ServerMaxStreams
            | ConfigKey::ServerAcceptTimeout
            | ConfigKey::ServerCompressionLevel
            | ConfigKey::ServerBlockSize
            | ConfigKey::ServerSpoolLimit => "server",
            ConfigKey::LoggingLevel | ConfigKey::LoggingDirectory => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            ConfigKey::ClientStreams => "streams",
            ConfigKey::ClientCompressed => "compressed",
            ConfigKey::ClientDecompress => "decompress",
            ConfigKey::ClientBlockSize | ConfigKey::ServerBlockSize => "block_size",
            ConfigKey::ClientConnectTimeout => "connect_timeout",
            ConfigKey::ClientKeepPartials => "keep_partials",
            ConfigKey::ServerBind => "bind",
            ConfigKey::ServerPort => "port",
            ConfigKey::ServerRoot => "root",
            ConfigKey::ServerMaxStreams => "max_streams",
            ConfigKey::ServerAcceptTimeout => "accept_timeout",
            ConfigKey::ServerCompressionLevel => "compression_level",
            ConfigKey::ServerSpoolLimit => "spool_limit",
            ConfigKey::LoggingLevel => "level",
            ConfigKey::LoggingDirectory => "directory",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as text; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        let c = &config.client;
        let s = &config.server;
        let l = &config.logging;
        let path = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };

        match self {
            ConfigKey::ClientStreams => c.streams.to_string(),
            ConfigKey::ClientCompressed => c.compressed.to_string(),
            ConfigKey::ClientDecompress => c.decompress.to_string(),
            ConfigKey::ClientBlockSize => c.block_size.to_string(),
            ConfigKey::ClientConnectTimeout => c.connect_timeout.to_string(),
            ConfigKey::ClientKeepPartials => c.keep_partials.to_string(),
            ConfigKey::ServerBind => s.bind.clone(),
            ConfigKey::ServerPort => s.port.to_string(),
            ConfigKey::ServerRoot => path(&s.root),
            ConfigKey::ServerMaxStreams => s.max_streams.to_string(),
            ConfigKey::ServerAcceptTimeout => s.accept_timeout.to_string(),
            ConfigKey::ServerCompressionLevel => s.compression_level.to_string(),
            ConfigKey::ServerBlockSize => s.block_size.to_string(),
            ConfigKey::ServerSpoolLimit => s.spool_limit.to_string(),
            ConfigKey::LoggingLevel => l.level.clone(),
            ConfigKey::LoggingDirectory => path(&l.directory),
        }
    }

    /// Parse `value` and store it. An empty value clears optional paths.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigFileError> {
        let section = self.section();
        let key = self.key_name();
        let c = &mut config.client;
        let s = &mut config.server;
        let l = &mut config.logging;
        let path = |v: &str| (!v.trim().is_empty()).then(|| PathBuf::from(v.trim()));

        match self {
            ConfigKey::ClientStreams => {
                let streams: usize = parse(section, key, value)?;
                if streams == 0 {
                    return Err(invalid(section, key, value, "must be at least 1"));
                }
                c.streams = streams;
            }
            ConfigKey::ClientCompressed => c.compressed = parse_bool(section, key, value)?,
            ConfigKey::ClientDecompress => c.decompress = parse_bool(section, key, value)?,
            ConfigKey::ClientBlockSize => c.block_size = parse(section, key, value)?,
            ConfigKey::ClientConnectTimeout => c.connect_timeout = parse(section, key, value)?,
            ConfigKey::ClientKeepPartials => c.keep_partials = parse_bool(section, key, value)?,
            ConfigKey::ServerBind => {
                let ip: std::net::IpAddr = parse(section, key, value)?;
                s.bind = ip.to_string();
            }
            ConfigKey::ServerPort => s.port = parse(section, key, value)?,
            ConfigKey::ServerRoot => s.root = path(value),
            ConfigKey::ServerMaxStreams => s.max_streams = parse(section, key, value)?,
            ConfigKey::ServerAcceptTimeout => s.accept_timeout = parse(section, key, value)?,
            ConfigKey::ServerCompressionLevel => {
                let level: u32 = parse(section, key, value)?;
                if level > 9 {
                    return Err(invalid(section, key, value, "must be between 0 and 9"));
                }
                s.compression_level = level;
            }
            ConfigKey::ServerBlockSize => s.block_size = parse(section, key, value)?,
            ConfigKey::ServerSpoolLimit => s.spool_limit = parse(section, key, value)?,
            ConfigKey::LoggingLevel => l.level = value.trim().to_string(),
            ConfigKey::LoggingDirectory => l.directory = path(value),
        }
        Ok(())
    }
}

impl FromStr for ConfigKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_KEYS
            .iter()
            .copied()
            .find(|key| key.name() == s)
            .ok_or_else(|| format!("unknown configuration key '{}'", s))
    }
}
