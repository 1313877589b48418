//! Download orchestrator.
//!
//! Drives one download from the control handshake to the joined file:
//!
//! ```text
//! connect ─► request ─► response ─┬─ not_found ─────────────► NotFound
//!                                 ├─ rejected ──────────────► InvalidArgument
//!                                 └─ found ─► confirm ─┬─ no ► Declined
//!                                                      └─ yes ► receive × N ─► join
//! ```
//!
//! Nothing is written to disk before the user confirms, and existing
//! partition files for the target are never touched. Any receiver failure
//! fails the whole download; the partition files this download created are
//! removed and no join is attempted.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::receiver::{ReceivedPartition, ReceiverRun, ReceiverWorker};
use crate::address::validate_target;
use crate::error::{TransferError, TransferResult};
use crate::join::{self, Decompression, FallbackPolicy, JoinOptions, JoinReport, Joiner};
use crate::partition::partial_paths;
use crate::progress::{ProgressCounters, ProgressReporter, TransferProgressCallback};
use crate::protocol::{read_message, write_message, DownloadRequest, Message, ResponseStatus};
use crate::transport::{TcpTransport, Transport};

/// Default number of parallel streams.
pub const DEFAULT_STREAMS: usize = 4;

/// Default receive block size (1MB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Default control/data connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for one download.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Server control address.
    pub server: SocketAddr,
    /// Path of the file on the server.
    pub remote_path: String,
    /// Local file to create.
    pub target: PathBuf,
    pub streams: usize,
    /// Ask the server to gzip each partition.
    pub compressed: bool,
    /// Decompress and join right away when `compressed` is set. Otherwise the
    /// compressed partitions are left on disk for `ccp finish`.
    pub decompress: bool,
    pub block_size: usize,
    pub connect_timeout: Option<Duration>,
    /// Keep partition files after joining.
    pub keep_partials: bool,
    pub fallback: FallbackPolicy,
    pub transport: Arc<dyn Transport>,
}

impl DownloadOptions {
    pub fn new(server: SocketAddr, remote_path: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            server,
            remote_path: remote_path.into(),
            target: target.into(),
            streams: DEFAULT_STREAMS,
            compressed: false,
            decompress: false,
            block_size: DEFAULT_BLOCK_SIZE,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            keep_partials: false,
            fallback: FallbackPolicy::Lenient,
            transport: Arc::new(TcpTransport),
        }
    }

    pub fn with_streams(mut self, streams: usize) -> Self {
        self.streams = streams;
        self
    }

    pub fn with_compression(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn with_decompress(mut self, decompress: bool) -> Self {
        self.decompress = decompress;
        self
    }

    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_keep_partials(mut self, keep: bool) -> Self {
        self.keep_partials = keep;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Whether partitions are joined as part of the download.
    fn joins(&self) -> bool {
        !self.compressed || self.decompress
    }
}

/// What the server offered, shown to the user before any data moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOffer {
    pub remote_path: String,
    pub total_size: u64,
    pub streams: usize,
    pub compressed: bool,
}

/// Decides whether an offered download goes ahead.
pub trait Confirmation {
    fn confirm(&self, offer: &DownloadOffer) -> bool;
}

impl<F> Confirmation for F
where
    F: Fn(&DownloadOffer) -> bool,
{
    fn confirm(&self, offer: &DownloadOffer) -> bool {
        self(offer)
    }
}

/// Accepts every offer.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

impl Confirmation for AutoConfirm {
    fn confirm(&self, _offer: &DownloadOffer) -> bool {
        true
    }
}

/// A finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub target: PathBuf,
    /// Size of the file on the server.
    pub total_size: u64,
    /// Bytes received over all data connections.
    pub bytes_received: u64,
    pub join: JoinReport,
    pub elapsed: Duration,
}

/// How a download ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The target file was written.
    Completed(DownloadReport),
    /// Compressed partitions were received and left for a later join.
    PartitionsPending {
        partials: Vec<PathBuf>,
        bytes_received: u64,
    },
    /// The server has no regular file at that path. Nothing was written.
    NotFound { path: String },
    /// The user declined the offer. Nothing was written.
    Declined,
}

/// Client side of a download.
pub struct Downloader {
    options: DownloadOptions,
    confirmation: Box<dyn Confirmation>,
    on_progress: Option<TransferProgressCallback>,
}

impl Downloader {
    pub fn new(options: DownloadOptions) -> Self {
        Self {
            options,
            confirmation: Box::new(AutoConfirm),
            on_progress: None,
        }
    }

    pub fn with_confirmation(mut self, confirmation: impl Confirmation + 'static) -> Self {
        self.confirmation = Box::new(confirmation);
        self
    }

    pub fn with_progress(mut self, callback: TransferProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Run the download.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a zero stream count or a request the server rejects
    /// - `PathConflict` if the target or one of its partition files exists,
    ///   or its directory is missing
    /// - `Partition { index, .. }` wrapping the first receiver failure
    /// - `Protocol`/`Io` for control-channel failures
    pub fn download(self) -> TransferResult<DownloadOutcome> {
        let Downloader {
            options,
            confirmation,
            on_progress,
        } = self;

        if options.streams == 0 {
            return Err(TransferError::InvalidArgument(
                "stream count must be at least 1".to_string(),
            ));
        }
        let stream_count = u32::try_from(options.streams).map_err(|_| {
            TransferError::InvalidArgument(format!("stream count {} is too large", options.streams))
        })?;
        validate_target(&options.target)?;
        let partials = partial_paths(&options.target, options.streams);
        check_partials_absent(&partials)?;

        let started = Instant::now();
        let mut control = connect(options.server, options.connect_timeout)?;
        info!(server = %options.server, path = %options.remote_path, "Connected");

        let request = DownloadRequest::new(&options.remote_path, stream_count, options.compressed);
        write_message(&mut control, &Message::from(request))?;
        let response = read_message(&mut control)?.into_response()?;

        let (total_size, ports) = match response.status {
            ResponseStatus::NotFound => {
                info!(path = %options.remote_path, "Remote file not found");
                return Ok(DownloadOutcome::NotFound {
                    path: options.remote_path,
                });
            }
            ResponseStatus::Rejected(reason) => {
                return Err(TransferError::InvalidArgument(format!(
                    "server rejected request: {}",
                    reason
                )))
            }
            ResponseStatus::Found => match (response.total_size, response.ports) {
                (Some(size), Some(ports)) => (size, ports),
                _ => {
                    return Err(TransferError::Protocol(
                        "found response without size or ports".to_string(),
                    ))
                }
            },
        };

        if ports.len() != options.streams {
            return Err(TransferError::Protocol(format!(
                "server offered {} ports for {} streams",
                ports.len(),
                options.streams
            )));
        }

        let offer = DownloadOffer {
            remote_path: options.remote_path.clone(),
            total_size,
            streams: options.streams,
            compressed: options.compressed,
        };
        if !confirmation.confirm(&offer) {
            info!("Download declined");
            return Ok(DownloadOutcome::Declined);
        }

        // Data ports live on the host that answered the control connection.
        let host = control.peer_addr()?.ip();
        let counters = Arc::new(ProgressCounters::new(options.streams));
        let reporter = on_progress
            .map(|callback| ProgressReporter::start_default(Arc::clone(&counters), callback));

        let runs = receive_all(&options, host, &ports, &partials, &counters);

        counters.signal_done();
        if let Some(reporter) = reporter {
            reporter.stop();
        }
        drop(control);

        let created: Vec<PathBuf> = runs
            .iter()
            .zip(&partials)
            .filter(|(run, _)| run.created_file)
            .map(|(_, path)| path.clone())
            .collect();
        let results = runs.into_iter().map(|run| run.result).collect();

        let received = match collect(results) {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, files = created.len(), "Download failed, removing partition files");
                if let Err(cleanup) = join::remove_partials(&created) {
                    warn!(error = %cleanup, "Cannot remove partition files");
                }
                return Err(e);
            }
        };

        let bytes_received: u64 = received.iter().map(|r| r.bytes).sum();
        info!(
            bytes = bytes_received,
            streams = options.streams,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "All partitions received"
        );

        if !options.joins() {
            return Ok(DownloadOutcome::PartitionsPending {
                partials,
                bytes_received,
            });
        }

        let decompression = if options.compressed {
            Decompression::Auto
        } else {
            Decompression::Off
        };
        let join_report = Joiner::new(
            JoinOptions::default()
                .with_decompression(decompression)
                .with_fallback(options.fallback)
                .with_keep_partials(options.keep_partials),
        )
        .join(&partials, &options.target)?;

        Ok(DownloadOutcome::Completed(DownloadReport {
            target: options.target,
            total_size,
            bytes_received,
            join: join_report,
            elapsed: started.elapsed(),
        }))
    }
}

/// Partition files left by an earlier download belong to that download.
fn check_partials_absent(partials: &[PathBuf]) -> TransferResult<()> {
    match partials.iter().find(|path| path_taken(path)) {
        Some(path) => Err(TransferError::PathConflict {
            path: path.clone(),
            reason: "partition file already exists (join it with `ccp finish` or remove it)"
                .to_string(),
        }),
        None => Ok(()),
    }
}

fn path_taken(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

fn connect(addr: SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let stream = match timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Run one receiver per port and wait for all of them.
fn receive_all(
    options: &DownloadOptions,
    host: IpAddr,
    ports: &[u16],
    partials: &[PathBuf],
    counters: &Arc<ProgressCounters>,
) -> Vec<ReceiverRun> {
    let handles: Vec<(usize, io::Result<JoinHandle<ReceiverRun>>)> = ports
        .iter()
        .zip(partials)
        .enumerate()
        .map(|(index, (port, path))| {
            let worker = ReceiverWorker {
                index,
                addr: SocketAddr::new(host, *port),
                path: path.clone(),
                block_size: options.block_size,
                connect_timeout: options.connect_timeout,
                transport: Arc::clone(&options.transport),
                counters: Arc::clone(counters),
            };
            let handle = thread::Builder::new()
                .name(format!("ccp-recv-{}", index))
                .spawn(move || worker.run());
            (index, handle)
        })
        .collect();

    handles
        .into_iter()
        .map(|(index, handle)| {
            let run = match handle {
                Ok(handle) => handle.join().unwrap_or_else(|_| ReceiverRun {
                    created_file: false,
                    result: Err(TransferError::Io(io::Error::other("receiver thread panicked"))),
                }),
                Err(e) => ReceiverRun {
                    created_file: false,
                    result: Err(e.into()),
                },
            };
            if let Err(e) = &run.result {
                debug!(partition = index, error = %e, "Receiver failed");
            }
            run
        })
        .collect()
}

/// The received partitions, or the lowest-index failure.
fn collect(results: Vec<TransferResult<ReceivedPartition>>) -> TransferResult<Vec<ReceivedPartition>> {
    results
        .into_iter()
        .enumerate()
        .map(|(index, result)| result.map_err(|e| e.in_partition(index)))
        .collect()
}
