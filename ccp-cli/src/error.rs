//! CLI error type and exit codes.

use ccp::config::ConfigFileError;
use ccp::logging::LoggingError;
use ccp::TransferError;
use thiserror::Error;

/// Exit code for bad arguments, addresses or ports.
pub const EXIT_INVALID_ARGUMENT: i32 = 2;
/// Exit code when the remote file does not exist.
pub const EXIT_NOT_FOUND: i32 = 3;
/// Exit code when the user declines a download or shutdown.
pub const EXIT_DECLINED: i32 = 4;
/// Exit code when compared files differ.
pub const EXIT_DIFFERENT: i32 = 5;
/// Exit code for everything else.
pub const EXIT_FAILURE: i32 = 1;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid command-line input.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(#[from] LoggingError),

    /// The remote file does not exist.
    #[error("Remote file not found: {0}")]
    NotFound(String),

    /// The user said no.
    #[error("Cancelled by user")]
    Declined,

    /// `compare` found a difference.
    #[error("{0}")]
    Different(String),

    /// Transfer, join or I/O failure.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Terminal error: {0}")]
    Terminal(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgument(_) => EXIT_INVALID_ARGUMENT,
            CliError::Transfer(TransferError::InvalidArgument(_))
            | CliError::Transfer(TransferError::PathConflict { .. }) => EXIT_INVALID_ARGUMENT,
            CliError::NotFound(_) => EXIT_NOT_FOUND,
            CliError::Declined => EXIT_DECLINED,
            CliError::Different(_) => EXIT_DIFFERENT,
            CliError::Config(_)
            | CliError::Logging(_)
            | CliError::Transfer(_)
            | CliError::Terminal(_) => EXIT_FAILURE,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Transfer(TransferError::Io(e))
    }
}

impl From<dialoguer::Error> for CliError {
    fn from(e: dialoguer::Error) -> Self {
        CliError::Terminal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::InvalidArgument("x".into()).exit_code(), 2);
        assert_eq!(CliError::NotFound("f".into()).exit_code(), 3);
        assert_eq!(CliError::Declined.exit_code(), 4);
        assert_eq!(CliError::Different("d".into()).exit_code(), 5);
        assert_eq!(CliError::Config("c".into()).exit_code(), 1);
    }

    #[test]
    fn test_library_argument_errors_map_to_invalid_argument() {
        let err = CliError::from(TransferError::InvalidArgument("bad address".into()));
        assert_eq!(err.exit_code(), 2);

        let err = CliError::from(TransferError::PathConflict {
            path: PathBuf::from("out"),
            reason: "file already exists".into(),
        });
        assert_eq!(err.exit_code(), 2);

        let err = CliError::from(TransferError::ConnectionBroken {
            expected: 10,
            received: 1,
        });
        assert_eq!(err.exit_code(), 1);
    }
}
