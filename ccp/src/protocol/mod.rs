//! Wire protocol: typed messages and their framing.
//!
//! # Control channel (one TCP connection per download)
//!
//! ```text
//! client                                   server
//!   │ ── DownloadRequest{path, n, gz} ──────► │
//!   │ ◄── DownloadResponse{status, size, ports} │
//! ```
//!
//! # Data channel (one TCP connection per partition)
//!
//! ```text
//!   │ ◄── DataHeader{partition, length, gz} ── │
//!   │ ◄── <length raw bytes> ───────────────── │
//! ```

mod codec;
mod message;

pub use codec::{
    read_message, recv_exact, recv_exact_into, write_message, Codec, FRAME_HEADER_LEN,
    MAX_FRAME_LEN, PROTOCOL_VERSION,
};
pub use message::{DataHeader, DownloadRequest, DownloadResponse, Message, ResponseStatus};
