//! Error types for transfer operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors that can occur while negotiating, moving or joining partitions.
///
/// A missing remote file is not an error: it is reported as
/// [`ResponseStatus::NotFound`](crate::protocol::ResponseStatus) on the wire
/// and [`DownloadOutcome::NotFound`](crate::client::DownloadOutcome) to callers.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Malformed, oversized or unexpected control message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer closed the connection before the declared byte count arrived.
    #[error("connection broken after {received} of {expected} bytes")]
    ConnectionBroken { expected: u64, received: u64 },

    /// Rejected before any network activity (zero streams, bad address, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The local target path cannot be used.
    #[error("path conflict for {}: {reason}", path.display())]
    PathConflict { path: PathBuf, reason: String },

    /// A single partition worker failed.
    #[error("partition {index} failed: {source}")]
    Partition {
        index: usize,
        #[source]
        source: Box<TransferError>,
    },

    /// A partition carries the gzip header but does not decompress.
    ///
    /// Only produced by the joiner in strict mode.
    #[error("corrupt compressed partition {}: {reason}", path.display())]
    CorruptPartition { path: PathBuf, reason: String },

    /// The owning connection was cancelled.
    #[error("transfer cancelled")]
    Cancelled,

    /// I/O error on a socket or file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Wrap this error with the index of the partition that produced it.
    pub fn in_partition(self, index: usize) -> Self {
        TransferError::Partition {
            index,
            source: Box::new(self),
        }
    }

    /// Returns true if this error (or the partition failure it wraps) is a
    /// broken connection.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            TransferError::ConnectionBroken { .. } => true,
            TransferError::Partition { source, .. } => source.is_connection_broken(),
            _ => false,
        }
    }

    /// Map a write-side socket error to `ConnectionBroken` when the peer went
    /// away, keeping other I/O errors as they are.
    pub(crate) fn from_send(err: io::Error, expected: u64, sent: u64) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => TransferError::ConnectionBroken {
                expected,
                received: sent,
            },
            _ => TransferError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_broken_display() {
        let err = TransferError::ConnectionBroken {
            expected: 1000,
            received: 100,
        };
        assert_eq!(err.to_string(), "connection broken after 100 of 1000 bytes");
    }

    #[test]
    fn test_partition_wrapper_keeps_kind() {
        let err = TransferError::ConnectionBroken {
            expected: 10,
            received: 0,
        }
        .in_partition(2);

        assert!(err.is_connection_broken());
        assert!(err.to_string().starts_with("partition 2 failed"));
    }

    #[test]
    fn test_from_send_maps_broken_pipe() {
        let err = TransferError::from_send(io::Error::from(io::ErrorKind::BrokenPipe), 50, 20);
        assert!(matches!(
            err,
            TransferError::ConnectionBroken {
                expected: 50,
                received: 20
            }
        ));

        let err = TransferError::from_send(io::Error::from(io::ErrorKind::PermissionDenied), 50, 20);
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[test]
    fn test_path_conflict_display() {
        let err = TransferError::PathConflict {
            path: PathBuf::from("/tmp/out.bin"),
            reason: "file already exists".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "path conflict for /tmp/out.bin: file already exists"
        );
    }
}
