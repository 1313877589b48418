//! Download client.
//!
//! # Architecture
//!
//! ```text
//! Downloader (orchestrator)
//!         │
//!         ├── control connection (request / response)
//!         │
//!         ├── Confirmation (injected, e.g. a console prompt)
//!         │
//!         ├── ReceiverWorker × N ──► <target>.part<i>
//!         │       └── ProgressCounters ──► ProgressReporter
//!         │
//!         └── Joiner ──► <target>
//! ```
//!
//! # Example
//!
//! ```ignore
//! use ccp::client::{DownloadOptions, DownloadOutcome, Downloader};
//!
//! let options = DownloadOptions::new(server, "/srv/disk.img", "disk.img")
//!     .with_streams(8)
//!     .with_compression(true)
//!     .with_decompress(true);
//!
//! match Downloader::new(options).download()? {
//!     DownloadOutcome::Completed(report) => println!("{} bytes", report.join.bytes_written),
//!     other => println!("{:?}", other),
//! }
//! ```

mod orchestrator;
mod receiver;

pub use orchestrator::{
    AutoConfirm, Confirmation, DownloadOffer, DownloadOptions, DownloadOutcome, DownloadReport,
    Downloader, DEFAULT_BLOCK_SIZE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_STREAMS,
};
pub use receiver::ReceivedPartition;
