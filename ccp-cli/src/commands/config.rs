//! Configuration management CLI commands.
//!
//! `config get`, `config set`, `config list`, `config path` and
//! `config init` read or write `~/.ccp/config.ini` (or the file given with
//! `--config`).

use std::path::Path;

use ccp::config::{config_file_path, ConfigFile, ConfigKey};
use clap::Subcommand;

use crate::error::CliError;
use crate::runner::{load_config, GlobalArgs};

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Get a configuration value
    Get {
        /// Configuration key in format section.key (e.g., client.streams)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key in format section.key (e.g., client.streams)
        key: String,

        /// Value to set
        value: String,
    },

    /// List all configuration settings
    List,

    /// Show the configuration file path
    Path,

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, global: &GlobalArgs) -> Result<(), CliError> {
    let path = global.config.clone().unwrap_or_else(config_file_path);
    match command {
        ConfigCommands::Get { key } => run_get(&path, &key),
        ConfigCommands::Set { key, value } => run_set(&path, &key, &value),
        ConfigCommands::List => run_list(&path),
        ConfigCommands::Path => run_path(&path),
        ConfigCommands::Init { force } => run_init(&path, force),
    }
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::InvalidArgument(format!(
            "Unknown configuration key '{}'. Use 'ccp config list' to see available keys.",
            key
        ))
    })
}

/// Get a configuration value.
fn run_get(path: &Path, key: &str) -> Result<(), CliError> {
    let config_key = parse_key(key)?;
    let config = load_config(path)?;
    let value = config_key.get(&config);

    if value.is_empty() {
        println!("(not set)");
    } else {
        println!("{}", value);
    }

    Ok(())
}

/// Set a configuration value.
fn run_set(path: &Path, key: &str, value: &str) -> Result<(), CliError> {
    let config_key = parse_key(key)?;

    let mut config = load_config(path)?;
    config_key
        .set(&mut config, value)
        .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
    config.save_to(path)?;

    println!("Set {} = {}", config_key.name(), value);

    Ok(())
}

/// List all configuration settings.
fn run_list(path: &Path) -> Result<(), CliError> {
    let config = load_config(path)?;

    println!("Configuration Settings");
    println!("======================");
    println!();

    let mut current_section = "";

    for key in ConfigKey::all() {
        let section = key.section();

        if section != current_section {
            if !current_section.is_empty() {
                println!();
            }
            println!("[{}]", section);
            current_section = section;
        }

        let value = key.get(&config);
        let key_name = key.key_name();

        if value.is_empty() {
            println!("  {} = (not set)", key_name);
        } else {
            println!("  {} = {}", key_name, value);
        }
    }

    Ok(())
}

fn run_path(path: &Path) -> Result<(), CliError> {
    println!("{}", path.display());
    Ok(())
}

fn run_init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::InvalidArgument(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    ConfigFile::default().save_to(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn global(dir: &TempDir) -> GlobalArgs {
        GlobalArgs {
            debug: false,
            config: Some(dir.path().join("config.ini")),
        }
    }

    #[test]
    fn test_set_then_get_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let g = global(&dir);

        run(
            ConfigCommands::Set {
                key: "client.streams".into(),
                value: "12".into(),
            },
            &g,
        )
        .unwrap();

        let config = load_config(&dir.path().join("config.ini")).unwrap();
        assert_eq!(config.client.streams, 12);
    }

    #[test]
    fn test_unknown_key_is_invalid_argument() {
        let dir = TempDir::new().unwrap();
        let err = run(ConfigCommands::Get { key: "nope.key".into() }, &global(&dir)).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_bad_value_is_rejected_and_file_untouched() {
        let dir = TempDir::new().unwrap();
        let err = run(
            ConfigCommands::Set {
                key: "server.port".into(),
                value: "not-a-port".into(),
            },
            &global(&dir),
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(!dir.path().join("config.ini").exists());
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let g = global(&dir);

        run(ConfigCommands::Init { force: false }, &g).unwrap();
        assert!(run(ConfigCommands::Init { force: false }, &g).is_err());
        run(ConfigCommands::Init { force: true }, &g).unwrap();
    }
}
