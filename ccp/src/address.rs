//! Server address parsing and local target checks.
//!
//! Both run before any network activity.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use crate::error::{TransferError, TransferResult};

/// Parse `<host>:<port>` into a socket address.
///
/// Host names are resolved; the first address wins. IPv6 literals must be
/// bracketed (`[::1]:4567`).
pub fn parse_address(input: &str) -> TransferResult<SocketAddr> {
    let invalid = |reason: &str| {
        TransferError::InvalidArgument(format!("invalid address '{}': {}", input, reason))
    };

    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected <host>:<port>"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    port.parse::<u16>()
        .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

    input
        .to_socket_addrs()
        .map_err(|e| invalid(&e.to_string()))?
        .next()
        .ok_or_else(|| invalid("host did not resolve"))
}

/// Check that `target` can be created: it must not exist yet and its parent
/// directory must.
pub fn validate_target(target: &Path) -> TransferResult<()> {
    let conflict = |reason: &str| TransferError::PathConflict {
        path: target.to_path_buf(),
        reason: reason.to_string(),
    };

    if target.exists() {
        return Err(conflict("file already exists"));
    }

    match target.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Ok(()),
        Some(parent) if !parent.is_dir() => Err(conflict("parent directory does not exist")),
        Some(_) => Ok(()),
        None => Err(conflict("not a file path")),
    }
}
