//! Per-connection state machine of the control endpoint.
//!
//! ```text
//! REQUEST ──► validate ──► resolve ──► plan ──► bind N ──► respond ──► send ──► join
//!               │            │
//!               ▼            ▼
//!            REJECTED     NOT_FOUND
//! ```
//!
//! Every failure stays inside the connection. Listeners that were bound but
//! never accepted are dropped (closed) on every exit path, either by unwinding
//! the `Vec` that owns them or by the sender worker that took them.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::registry::ConnectionRegistry;
use super::sender::SenderWorker;
use super::ServerConfig;
use crate::error::{TransferError, TransferResult};
use crate::partition::plan;
use crate::protocol::{read_message, write_message, DownloadRequest, DownloadResponse, Message};
use crate::transport::{Cancellation, DataListener};

/// How often the control socket is checked for a client hang-up while
/// senders are running.
const CONTROL_WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// How a control connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConnectionOutcome {
    Rejected(String),
    NotFound,
    Served { partitions: usize, failed: usize },
}

/// Serve one control connection to completion, logging instead of failing.
pub(crate) fn handle_connection(
    control: TcpStream,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
) {
    let cancel = Cancellation::new();
    let registration = registry.register(peer, &control, cancel.clone());
    let conn = registration.id();

    let result = ConnectionHandler {
        conn,
        control,
        config,
        cancel,
    }
    .serve(|path, ports| registration.update(path, ports));

    match result {
        Ok(ConnectionOutcome::Served { partitions, failed }) if failed > 0 => {
            warn!(conn, partitions, failed, "Connection closed with failed partitions")
        }
        Ok(outcome) => debug!(conn, ?outcome, "Connection closed"),
        Err(e) => warn!(conn, peer = %peer, error = %e, "Connection failed"),
    }
}

struct ConnectionHandler {
    conn: u64,
    control: TcpStream,
    config: Arc<ServerConfig>,
    cancel: Cancellation,
}

impl ConnectionHandler {
    fn serve(mut self, on_bound: impl FnOnce(&str, &[u16])) -> TransferResult<ConnectionOutcome> {
        let request = read_message(&mut self.control)?.into_request()?;
        let conn = self.conn;

        info!(
            conn,
            path = %request.path,
            streams = request.stream_count,
            compressed = request.compressed,
            "Download requested"
        );

        if let Err(reason) = validate(&request, self.config.max_streams) {
            info!(conn, reason = %reason, "Request rejected");
            write_message(&mut self.control, &DownloadResponse::rejected(reason.clone()).into())?;
            return Ok(ConnectionOutcome::Rejected(reason));
        }

        let source = resolve_path(&self.config.root, &request.path);
        let total_size = match regular_file_size(&source) {
            Some(size) => size,
            None => {
                info!(conn, path = %source.display(), "Requested file not found");
                write_message(&mut self.control, &DownloadResponse::not_found().into())?;
                return Ok(ConnectionOutcome::NotFound);
            }
        };

        let partitions = plan(total_size, request.stream_count as usize)?;
        let listeners = self.bind_listeners(partitions.len())?;
        let ports: Vec<u16> = listeners.iter().map(|l| l.port()).collect();
        on_bound(&request.path, &ports);

        debug!(conn, ?ports, size = total_size, "Data listeners bound");
        write_message(
            &mut self.control,
            &Message::from(DownloadResponse::found(total_size, ports)),
        )?;

        let mut handles = Vec::with_capacity(partitions.len());
        for (partition, listener) in partitions.into_iter().zip(listeners) {
            let worker = SenderWorker {
                partition,
                listener,
                source: source.clone(),
                compressed: request.compressed,
                cancel: self.cancel.clone(),
                config: Arc::clone(&self.config),
            };
            let spawned = thread::Builder::new()
                .name(format!("ccp-send-{}-{}", conn, partition.index))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.cancel.cancel();
                    join_senders(conn, handles);
                    return Err(e.into());
                }
            }
        }

        self.watch_control(&handles);
        let partitions = handles.len();
        let failed = join_senders(conn, handles);

        Ok(ConnectionOutcome::Served { partitions, failed })
    }

    /// Bind one listener per partition on the control socket's local address,
    /// ordered by ascending port so that port rank equals partition index.
    fn bind_listeners(&self, count: usize) -> TransferResult<Vec<Box<dyn DataListener>>> {
        let ip = self.control.local_addr()?.ip();
        let mut listeners = (0..count)
            .map(|_| self.config.transport.bind(ip))
            .collect::<io::Result<Vec<_>>>()?;
        listeners.sort_by_key(|l| l.port());
        Ok(listeners)
    }

    /// Block until every sender finishes, cancelling them if the client
    /// hangs up the control connection first.
    fn watch_control(&mut self, handles: &[JoinHandle<TransferResult<u64>>]) {
        let conn = self.conn;
        let mut watching = match self.control.set_read_timeout(Some(CONTROL_WATCH_INTERVAL)) {
            Ok(()) => true,
            Err(e) => {
                debug!(conn, error = %e, "Cannot watch control socket");
                false
            }
        };
        let mut buf = [0u8; 64];

        while handles.iter().any(|h| !h.is_finished()) {
            if !watching {
                thread::sleep(CONTROL_WATCH_INTERVAL);
                continue;
            }

            match self.control.read(&mut buf) {
                Ok(0) => {
                    info!(conn, "Client closed control connection, cancelling pending partitions");
                    self.cancel.cancel();
                    watching = false;
                }
                Ok(n) => debug!(conn, bytes = n, "Ignoring unexpected control data"),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    info!(conn, error = %e, "Control connection lost, cancelling pending partitions");
                    self.cancel.cancel();
                    watching = false;
                }
            }
        }
    }
}

/// Join all sender threads and return how many failed.
fn join_senders(conn: u64, handles: Vec<JoinHandle<TransferResult<u64>>>) -> usize {
    let mut failed = 0;
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(_)) => {}
            Ok(Err(TransferError::Cancelled)) => {
                debug!(conn, partition = index, "Partition cancelled");
                failed += 1;
            }
            Ok(Err(e)) => {
                warn!(conn, partition = index, error = %e, "Partition failed");
                failed += 1;
            }
            Err(_) => {
                error!(conn, partition = index, "Sender thread panicked");
                failed += 1;
            }
        }
    }
    failed
}

fn validate(request: &DownloadRequest, max_streams: usize) -> Result<(), String> {
    if request.stream_count == 0 {
        return Err("stream count must be at least 1".to_string());
    }
    if request.stream_count as usize > max_streams {
        return Err(format!(
            "stream count {} exceeds server maximum {}",
            request.stream_count, max_streams
        ));
    }
    if request.path.is_empty() {
        return Err("empty path".to_string());
    }
    Ok(())
}

/// Absolute paths are used as-is; relative ones resolve against `root`.
fn resolve_path(root: &Path, requested: &str) -> PathBuf {
    let requested = Path::new(requested);
    if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    }
}

/// Size of `path` if it is a regular file.
fn regular_file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}
