//! Control endpoint.
//!
//! The server accepts control connections and serves each one on its own
//! thread. A connection reads one download request, binds one data listener
//! per partition and runs one sender worker per listener.
//!
//! # Architecture
//!
//! ```text
//! Server::run (accept loop)
//!         │
//!         ├── ConnectionRegistry (live connections, shutdown bookkeeping)
//!         │
//!         └── connection thread (one per client)
//!                 │
//!                 ├── plan() ──► N partitions
//!                 │
//!                 └── SenderWorker × N (one thread + one listener each)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use ccp::server::{Server, ServerConfig, ShutdownMode};
//!
//! let server = Server::bind(ServerConfig::default().with_port(4567))?;
//! let handle = server.handle();
//! ctrlc::set_handler(move || handle.shutdown(ShutdownMode::Force))?;
//! server.run()?;
//! ```

mod handler;
mod registry;
mod sender;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::compress::{DEFAULT_COMPRESSION_LEVEL, DEFAULT_SPOOL_LIMIT};
use crate::error::{TransferError, TransferResult};
use crate::transport::{TcpTransport, Transport};

pub use registry::{ConnectionRegistry, ConnectionSummary};

/// Default control port.
pub const DEFAULT_PORT: u16 = 4567;

/// Default upper bound on streams per request.
pub const DEFAULT_MAX_STREAMS: usize = 64;

/// Default block size for socket writes (1MB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Default time a sender waits for its data connection: no limit.
///
/// The deadline starts when the data ports are bound, before the client has
/// confirmed the download. A client that closes its control connection
/// cancels the pending accepts regardless.
pub const DEFAULT_ACCEPT_TIMEOUT: Option<Duration> = None;

/// How often the accept loop re-checks the shutdown flag.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Control endpoint configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the control listener binds to.
    pub bind: IpAddr,
    /// Control port (0 picks an ephemeral port).
    pub port: u16,
    /// Directory relative request paths resolve against.
    pub root: PathBuf,
    /// Largest stream count accepted per request.
    pub max_streams: usize,
    /// How long a sender waits for its data connection (None = forever).
    pub accept_timeout: Option<Duration>,
    /// Gzip level used for compressed requests.
    pub compression_level: u32,
    /// Bytes per socket write.
    pub block_size: usize,
    /// In-memory limit for a compressed partition before it spills to disk.
    pub spool_limit: usize,
    /// Data-channel transport.
    pub transport: Arc<dyn Transport>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            root: PathBuf::from("."),
            max_streams: DEFAULT_MAX_STREAMS,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            block_size: DEFAULT_BLOCK_SIZE,
            spool_limit: DEFAULT_SPOOL_LIMIT,
            transport: Arc::new(TcpTransport),
        }
    }
}

impl ServerConfig {
    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_max_streams(mut self, max: usize) -> Self {
        self.max_streams = max.max(1);
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.accept_timeout = timeout;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size.max(1);
        self
    }

    pub fn with_spool_limit(mut self, limit: usize) -> Self {
        self.spool_limit = limit;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// How to treat connections that are still active at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop accepting and let active transfers finish.
    Wait,
    /// Stop accepting and cancel active transfers.
    Force,
}

#[derive(Debug, Default)]
struct Shared {
    registry: Arc<ConnectionRegistry>,
    shutdown: AtomicBool,
}

/// Control endpoint bound to its listening socket.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    shared: Arc<Shared>,
}

impl Server {
    /// Bind the control listener.
    pub fn bind(config: ServerConfig) -> TransferResult<Self> {
        if config.max_streams == 0 {
            return Err(TransferError::InvalidArgument(
                "max_streams must be at least 1".to_string(),
            ));
        }

        let listener = TcpListener::bind(config.socket_addr())?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            config: Arc::new(config),
            shared: Arc::new(Shared::default()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle for shutting the server down from another thread.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Accept connections until shutdown is requested.
    ///
    /// Returns after every connection thread has been joined.
    pub fn run(self) -> TransferResult<()> {
        let addr = self.local_addr()?;
        info!(addr = %addr, root = %self.config.root.display(), "Server listening");

        let mut connections: Vec<JoinHandle<()>> = Vec::new();

        while !self.shared.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!(peer = %peer, error = %e, "Dropping connection");
                        continue;
                    }
                    info!(peer = %peer, "Connection accepted");

                    let config = Arc::clone(&self.config);
                    let registry = Arc::clone(&self.shared.registry);
                    let spawned = thread::Builder::new()
                        .name(format!("ccp-conn-{}", peer))
                        .spawn(move || handler::handle_connection(stream, peer, config, registry));

                    match spawned {
                        Ok(handle) => connections.push(handle),
                        Err(e) => error!(peer = %peer, error = %e, "Cannot spawn connection thread"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    reap_finished(&mut connections);
                    thread::sleep(SHUTDOWN_POLL_INTERVAL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => warn!(error = %e, "Accept failed"),
            }
        }

        drop(self.listener);
        info!(
            active = connections.iter().filter(|h| !h.is_finished()).count(),
            "Server stopping, waiting for connections"
        );

        for handle in connections {
            if handle.join().is_err() {
                error!("Connection thread panicked");
            }
        }

        info!("Server stopped");
        Ok(())
    }

    /// Run the accept loop on a background thread.
    pub fn spawn(self) -> TransferResult<RunningServer> {
        let local_addr = self.local_addr()?;
        let handle = self.handle();
        let thread = thread::Builder::new()
            .name("ccp-server".to_string())
            .spawn(move || self.run())?;

        Ok(RunningServer {
            local_addr,
            handle,
            thread,
        })
    }
}

fn reap_finished(connections: &mut Vec<JoinHandle<()>>) {
    let (finished, running): (Vec<_>, Vec<_>) =
        connections.drain(..).partition(|h| h.is_finished());
    for handle in finished {
        if handle.join().is_err() {
            error!("Connection thread panicked");
        }
    }
    *connections = running;
}

/// Cloneable handle to a server's shutdown and status controls.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// Request shutdown. Returns immediately; `Server::run` returns once all
    /// connection threads have finished.
    pub fn shutdown(&self, mode: ShutdownMode) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) && mode == ShutdownMode::Wait {
            return;
        }

        if mode == ShutdownMode::Force {
            let cancelled = self.shared.registry.cancel_all();
            info!(cancelled, "Forced shutdown requested");
        } else {
            debug!("Shutdown requested");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> Vec<ConnectionSummary> {
        self.shared.registry.snapshot()
    }
}

/// A server running on a background thread.
pub struct RunningServer {
    local_addr: SocketAddr,
    handle: ServerHandle,
    thread: JoinHandle<TransferResult<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    /// Shut down and wait for the accept loop and every connection to end.
    pub fn shutdown(self, mode: ShutdownMode) -> TransferResult<()> {
        self.handle.shutdown(mode);
        self.thread.join().map_err(|_| {
            TransferError::Io(io::Error::other("server thread panicked"))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_message, write_message, DownloadRequest, Message, ResponseStatus};
    use std::net::TcpStream;

    fn local_server(root: &std::path::Path) -> RunningServer {
        let config = ServerConfig::default()
            .with_port(0)
            .with_root(root)
            .with_max_streams(8)
            .with_accept_timeout(Some(Duration::from_secs(5)));
        Server::bind(config).unwrap().spawn().unwrap()
    }

    fn request(addr: SocketAddr, request: DownloadRequest) -> (TcpStream, crate::protocol::DownloadResponse) {
        let mut control = TcpStream::connect(addr).unwrap();
        write_message(&mut control, &Message::from(request)).unwrap();
        let response = read_message(&mut control).unwrap().into_response().unwrap();
        (control, response)
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4567);
        assert_eq!(config.compression_level, 1);
        assert_eq!(config.max_streams, 64);
        assert_eq!(config.bind, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.accept_timeout, None);
    }

    #[test]
    fn test_config_builders_clamp() {
        let config = ServerConfig::default()
            .with_max_streams(0)
            .with_compression_level(42)
            .with_block_size(0);
        assert_eq!(config.max_streams, 1);
        assert_eq!(config.compression_level, 9);
        assert_eq!(config.block_size, 1);
    }

    #[test]
    fn test_not_found_response() {
        let dir = tempfile::tempdir().unwrap();
        let server = local_server(dir.path());

        let (_control, response) = request(
            server.local_addr(),
            DownloadRequest::new("missing.bin", 4, false),
        );

        assert_eq!(response.status, ResponseStatus::NotFound);
        assert!(response.ports.is_none());
        server.shutdown(ShutdownMode::Wait).unwrap();
    }

    #[test]
    fn test_rejects_too_many_streams() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.bin"), b"data").unwrap();
        let server = local_server(dir.path());

        let (_control, response) =
            request(server.local_addr(), DownloadRequest::new("f.bin", 9, false));

        assert!(matches!(response.status, ResponseStatus::Rejected(_)));
        server.shutdown(ShutdownMode::Wait).unwrap();
    }

    #[test]
    fn test_ports_are_ascending_and_match_stream_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.bin"), vec![7u8; 1000]).unwrap();
        let server = local_server(dir.path());

        let (control, response) =
            request(server.local_addr(), DownloadRequest::new("f.bin", 5, false));

        assert_eq!(response.status, ResponseStatus::Found);
        assert_eq!(response.total_size, Some(1000));
        let ports = response.ports.unwrap();
        assert_eq!(ports.len(), 5);
        assert!(ports.windows(2).all(|w| w[0] < w[1]));

        let active = server.handle().active_connections();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].ports, ports);

        // Hanging up cancels the pending senders.
        drop(control);
        server.shutdown(ShutdownMode::Wait).unwrap();
    }

    #[test]
    fn test_force_shutdown_cancels_waiting_senders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.bin"), vec![1u8; 100]).unwrap();
        let config = ServerConfig::default()
            .with_port(0)
            .with_root(dir.path())
            .with_accept_timeout(None);
        let server = Server::bind(config).unwrap().spawn().unwrap();

        let (_control, response) =
            request(server.local_addr(), DownloadRequest::new("f.bin", 2, false));
        assert_eq!(response.status, ResponseStatus::Found);

        server.shutdown(ShutdownMode::Force).unwrap();
    }
}
