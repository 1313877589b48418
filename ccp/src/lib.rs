//! ccp - parallel multi-stream file transfer over TCP.
//!
//! A client asks a server for one file. The server splits the file into
//! contiguous partitions, optionally gzips each one on its own, and serves
//! every partition over a dedicated data connection. The client downloads
//! all partitions concurrently and joins them back in index order.
//!
//! ```text
//! Downloader ──control──► Server ──► plan() ──► N × (SenderWorker ═══► ReceiverWorker)
//!                                                                        │
//!                                                          Joiner ◄──────┘
//! ```

pub mod address;
pub mod client;
pub mod compare;
pub mod compress;
pub mod config;
pub mod error;
pub mod join;
pub mod logging;
pub mod partition;
pub mod progress;
pub mod protocol;
pub mod server;
pub mod transport;

pub use error::{TransferError, TransferResult};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
