//! Wire codec for framed messages.
//!
//! Frame format: 4-byte big-endian payload length + JSON envelope
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────────────┐
//! │ len: u32 BE  │ {"version":1,"message":{"type":"download_request",…}} │
//! └──────────────┴──────────────────────────────────────────────────────┘
//! ```
//!
//! The same framing is used on the control channel and as the opening
//! [`DataHeader`](super::DataHeader) of each data channel.

use std::io::{self, Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::message::Message;
use crate::error::{TransferError, TransferResult};

/// Current protocol version written into every envelope.
pub const PROTOCOL_VERSION: u16 = 1;

/// Length of the frame header (4 bytes, big-endian u32).
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest payload accepted; control messages are far smaller.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u16,
    message: &'a Message,
}

#[derive(Deserialize)]
struct Envelope {
    version: u16,
    message: Message,
}

/// Parsed before the full envelope so that a newer peer gets a version
/// error instead of an "unknown variant" one.
#[derive(Deserialize)]
struct VersionTag {
    version: u16,
}

/// Codec for length-prefixed, versioned messages.
pub struct Codec;

impl Codec {
    /// Encode a message to bytes with length prefix.
    pub fn encode(msg: &Message) -> TransferResult<Bytes> {
        let payload = serde_json::to_vec(&EnvelopeRef {
            version: PROTOCOL_VERSION,
            message: msg,
        })
        .map_err(|e| TransferError::Protocol(format!("serialization failed: {}", e)))?;

        if payload.len() > MAX_FRAME_LEN {
            return Err(TransferError::Protocol(format!(
                "message too large: {} bytes (max {})",
                payload.len(),
                MAX_FRAME_LEN
            )));
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);

        Ok(buf.freeze())
    }

    /// Decode a message from a buffer.
    ///
    /// Returns:
    /// - Ok(Some(msg)) if a complete frame was decoded (buffer is advanced)
    /// - Ok(None) if more data is needed (buffer unchanged)
    /// - Err if the frame is oversized or the payload is invalid
    #[cfg(test)]
    pub(crate) fn decode(buf: &mut BytesMut) -> TransferResult<Option<Message>> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let len = frame_len([buf[0], buf[1], buf[2], buf[3]])?;
        if buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }

        bytes::Buf::advance(buf, FRAME_HEADER_LEN);
        let payload = buf.split_to(len);
        Self::decode_payload(&payload).map(Some)
    }

    /// Decode a frame payload (without its length header).
    pub fn decode_payload(payload: &[u8]) -> TransferResult<Message> {
        let tag: VersionTag = serde_json::from_slice(payload)
            .map_err(|e| TransferError::Protocol(format!("malformed envelope: {}", e)))?;

        if tag.version == 0 || tag.version > PROTOCOL_VERSION {
            return Err(TransferError::Protocol(format!(
                "unsupported protocol version {} (supported: {})",
                tag.version, PROTOCOL_VERSION
            )));
        }

        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| TransferError::Protocol(format!("malformed message: {}", e)))?;

        Ok(envelope.message)
    }
}

fn frame_len(header: [u8; FRAME_HEADER_LEN]) -> TransferResult<usize> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransferError::Protocol(format!(
            "frame length {} exceeds maximum {}",
            len, MAX_FRAME_LEN
        )));
    }
    Ok(len)
}

/// Write one framed message and flush.
pub fn write_message<W: Write>(writer: &mut W, msg: &Message) -> TransferResult<()> {
    let frame = Codec::encode(msg)?;
    writer
        .write_all(&frame)
        .and_then(|_| writer.flush())
        .map_err(|e| TransferError::from_send(e, frame.len() as u64, 0))
}

/// Read exactly one framed message.
pub fn read_message<R: Read>(reader: &mut R) -> TransferResult<Message> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    recv_exact_into(reader, &mut header)?;
    let len = frame_len(header)?;
    let payload = recv_exact(reader, len)?;
    Codec::decode_payload(&payload)
}

/// Read exactly `n` bytes.
///
/// # Errors
///
/// `ConnectionBroken` if the peer closes before `n` bytes arrive. The read
/// is never retried.
pub fn recv_exact<R: Read>(reader: &mut R, n: usize) -> TransferResult<Vec<u8>> {
    let mut buf = vec![0u8; n];
    recv_exact_into(reader, &mut buf)?;
    Ok(buf)
}

/// Fill `buf` completely from `reader`.
pub fn recv_exact_into<R: Read>(reader: &mut R, buf: &mut [u8]) -> TransferResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(TransferError::ConnectionBroken {
                    expected: buf.len() as u64,
                    received: filled as u64,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
