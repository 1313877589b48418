//! Data-channel transport.
//!
//! Sender and receiver workers only see the [`Transport`], [`DataListener`]
//! and [`DataStream`] traits, so an alternate transport can be plugged in
//! without touching the partition protocol. [`TcpTransport`] is the one
//! shipped implementation.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{TransferError, TransferResult};

/// How often a pending accept re-checks cancellation and its deadline.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shared cancellation flag for one control connection.
///
/// Cloning shares the flag; cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` if the flag is raised.
    pub fn check(&self) -> TransferResult<()> {
        if self.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A connected data channel.
pub trait DataStream: Read + Write + Send {
    /// Signal end-of-stream to the peer after the last byte.
    fn finish(&mut self) -> io::Result<()>;
}

/// A bound, listening endpoint serving exactly one partition.
pub trait DataListener: Send {
    /// Port the listener is bound to.
    fn port(&self) -> u16;

    /// Wait for the single connection of this partition.
    ///
    /// Returns `Cancelled` as soon as `cancel` is raised and a timed-out I/O
    /// error once `timeout` elapses.
    fn accept(
        &self,
        cancel: &Cancellation,
        timeout: Option<Duration>,
    ) -> TransferResult<Box<dyn DataStream>>;
}

/// Factory for data-channel endpoints.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Bind an ephemeral listener on `ip`.
    fn bind(&self, ip: IpAddr) -> io::Result<Box<dyn DataListener>>;

    /// Connect to a partition listener.
    fn connect(&self, addr: SocketAddr, timeout: Option<Duration>)
        -> io::Result<Box<dyn DataStream>>;
}

/// Plain TCP transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn bind(&self, ip: IpAddr) -> io::Result<Box<dyn DataListener>> {
        let listener = TcpListener::bind(SocketAddr::new(ip, 0))?;
        let port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;
        Ok(Box::new(TcpDataListener { listener, port }))
    }

    fn connect(
        &self,
        addr: SocketAddr,
        timeout: Option<Duration>,
    ) -> io::Result<Box<dyn DataStream>> {
        let stream = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

impl DataStream for TcpStream {
    fn finish(&mut self) -> io::Result<()> {
        self.flush()?;
        match self.shutdown(Shutdown::Write) {
            // Peer already gone after reading everything.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

struct TcpDataListener {
    listener: TcpListener,
    port: u16,
}

impl DataListener for TcpDataListener {
    fn port(&self) -> u16 {
        self.port
    }

    fn accept(
        &self,
        cancel: &Cancellation,
        timeout: Option<Duration>,
    ) -> TransferResult<Box<dyn DataStream>> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            cancel.check()?;

            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    return Ok(Box::new(stream));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("no connection on port {} before deadline", self.port),
                        )
                        .into());
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
