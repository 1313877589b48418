//! Typed control and data-channel messages.
//!
//! Messages are tagged records serialized with serde. Unknown fields are
//! ignored on decode so newer peers can add fields without breaking older
//! ones; unknown message types fail as protocol errors.

use serde::{Deserialize, Serialize};

use crate::error::{TransferError, TransferResult};

/// Client request for one file, sent once per control connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Path on the server, absolute or relative to the server root.
    pub path: String,
    /// Number of partitions (and data connections) to use.
    pub stream_count: u32,
    /// Whether the server should gzip each partition before sending.
    pub compressed: bool,
}

impl DownloadRequest {
    /// Create a new download request.
    pub fn new(path: impl Into<String>, stream_count: u32, compressed: bool) -> Self {
        Self {
            path: path.into(),
            stream_count,
            compressed,
        }
    }
}

/// Outcome of a download request on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The file exists; size and ports follow.
    Found,
    /// The file does not exist or is not a regular file.
    NotFound,
    /// The request was refused before any socket was bound.
    Rejected(String),
}

/// Server reply to a [`DownloadRequest`].
///
/// `ports[i]` always serves partition `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub total_size: Option<u64>,
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
}

impl DownloadResponse {
    /// Response for an existing file.
    pub fn found(total_size: u64, ports: Vec<u16>) -> Self {
        Self {
            status: ResponseStatus::Found,
            total_size: Some(total_size),
            ports: Some(ports),
        }
    }

    /// Response for a missing file.
    pub fn not_found() -> Self {
        Self {
            status: ResponseStatus::NotFound,
            total_size: None,
            ports: None,
        }
    }

    /// Response for a request the server refuses to serve.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Rejected(reason.into()),
            total_size: None,
            ports: None,
        }
    }
}

/// First frame on every data connection.
///
/// `length` is the exact number of raw bytes that follow the frame
/// (post-compression size when `compressed` is set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataHeader {
    pub partition: u32,
    pub length: u64,
    pub compressed: bool,
}

/// Every message that travels inside a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    DownloadRequest(DownloadRequest),
    DownloadResponse(DownloadResponse),
    DataHeader(DataHeader),
}

impl Message {
    /// Short name used in logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::DownloadRequest(_) => "download_request",
            Message::DownloadResponse(_) => "download_response",
            Message::DataHeader(_) => "data_header",
        }
    }

    pub fn into_request(self) -> TransferResult<DownloadRequest> {
        match self {
            Message::DownloadRequest(request) => Ok(request),
            other => Err(unexpected("download_request", &other)),
        }
    }

    pub fn into_response(self) -> TransferResult<DownloadResponse> {
        match self {
            Message::DownloadResponse(response) => Ok(response),
            other => Err(unexpected("download_response", &other)),
        }
    }

    pub fn into_data_header(self) -> TransferResult<DataHeader> {
        match self {
            Message::DataHeader(header) => Ok(header),
            other => Err(unexpected("data_header", &other)),
        }
    }
}

impl From<DownloadRequest> for Message {
    fn from(request: DownloadRequest) -> Self {
        Message::DownloadRequest(request)
    }
}

impl From<DownloadResponse> for Message {
    fn from(response: DownloadResponse) -> Self {
        Message::DownloadResponse(response)
    }
}

impl From<DataHeader> for Message {
    fn from(header: DataHeader) -> Self {
        Message::DataHeader(header)
    }
}

fn unexpected(expected: &str, got: &Message) -> TransferError {
    TransferError::Protocol(format!("expected {}, got {}", expected, got.kind()))
}
