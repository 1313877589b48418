//! Sender worker: serves one partition over its own data connection.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::ServerConfig;
use crate::compress;
use crate::error::{TransferError, TransferResult};
use crate::partition::Partition;
use crate::protocol::{write_message, DataHeader, Message};
use crate::transport::{Cancellation, DataListener, DataStream};

/// Sends one partition to the single client that connects to its listener.
pub(crate) struct SenderWorker {
    pub partition: Partition,
    pub listener: Box<dyn DataListener>,
    pub source: PathBuf,
    pub compressed: bool,
    pub cancel: Cancellation,
    pub config: Arc<ServerConfig>,
}

impl SenderWorker {
    /// Accept the data connection and stream the partition.
    ///
    /// Returns the number of bytes written after the header. The listener is
    /// closed as soon as the connection is accepted or the accept fails.
    pub fn run(self) -> TransferResult<u64> {
        let SenderWorker {
            partition,
            listener,
            source,
            compressed,
            cancel,
            config,
        } = self;

        let port = listener.port();
        let mut stream = listener.accept(&cancel, config.accept_timeout)?;
        drop(listener);

        debug!(partition = partition.index, port, "Data connection accepted");
        let started = Instant::now();

        let mut file = File::open(&source)?;
        file.seek(SeekFrom::Start(partition.offset))?;
        let mut range = file.take(partition.length);

        let sent = if compressed {
            let mut blob =
                compress::compress_to_spool(&mut range, config.compression_level, config.spool_limit)?;
            if blob.source_len != partition.length {
                return Err(source_shrank(&partition, blob.source_len));
            }
            let length = blob.compressed_len;
            send_header(&mut stream, &partition, length, true)?;
            send_blocks(blob.reader()?, &mut stream, length, config.block_size, &cancel)?
        } else {
            send_header(&mut stream, &partition, partition.length, false)?;
            let sent = send_blocks(
                &mut range,
                &mut stream,
                partition.length,
                config.block_size,
                &cancel,
            )?;
            if sent != partition.length {
                return Err(source_shrank(&partition, sent));
            }
            sent
        };

        stream
            .finish()
            .map_err(|e| TransferError::from_send(e, sent, sent))?;

        info!(
            partition = partition.index,
            bytes = sent,
            source_bytes = partition.length,
            compressed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Partition sent"
        );

        Ok(sent)
    }
}

fn send_header(
    stream: &mut Box<dyn DataStream>,
    partition: &Partition,
    length: u64,
    compressed: bool,
) -> TransferResult<()> {
    let header = DataHeader {
        partition: partition.index as u32,
        length,
        compressed,
    };
    write_message(stream, &Message::from(header))
}

/// Copy up to `expected` bytes of `reader` to `stream` in blocks of
/// `block_size`, checking for cancellation before each block.
///
/// Stops without another read once `expected` bytes are out, so a
/// cancellation raised after the last block does not fail the partition.
fn send_blocks<R: Read + ?Sized>(
    reader: &mut R,
    stream: &mut Box<dyn DataStream>,
    expected: u64,
    block_size: usize,
    cancel: &Cancellation,
) -> TransferResult<u64> {
    let mut buf = vec![0u8; block_size.max(1)];
    let mut sent = 0u64;

    while sent < expected {
        cancel.check()?;

        let want = (expected - sent).min(buf.len() as u64) as usize;
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        stream
            .write_all(&buf[..n])
            .map_err(|e| TransferError::from_send(e, expected, sent))?;
        sent += n as u64;
    }

    Ok(sent)
}

fn source_shrank(partition: &Partition, read: u64) -> TransferError {
    TransferError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "source ended after {} of {} bytes in partition {}",
            read, partition.length, partition.index
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::decompress;
    use crate::protocol::read_message;
    use crate::transport::{TcpTransport, Transport};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::thread;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn source_file(dir: &tempfile::TempDir, data: &[u8]) -> PathBuf {
        let path = dir.path().join("source.bin");
        std::fs::write(&path, data).unwrap();
        path
    }

    /// Run a sender for `partition` and return what a client reads.
    fn serve_and_read(
        source: PathBuf,
        partition: Partition,
        compressed: bool,
    ) -> (TransferResult<u64>, DataHeader, Vec<u8>) {
        let config = Arc::new(ServerConfig::default().with_block_size(7));
        let listener = config.transport.bind(LOCALHOST).unwrap();
        let addr = SocketAddr::new(LOCALHOST, listener.port());

        let worker = SenderWorker {
            partition,
            listener,
            source,
            compressed,
            cancel: Cancellation::new(),
            config,
        };
        let handle = thread::spawn(move || worker.run());

        let mut stream = TcpTransport.connect(addr, None).unwrap();
        let header = read_message(&mut stream)
            .unwrap()
            .into_data_header()
            .unwrap();
        let mut body = Vec::new();
        stream.read_to_end(&mut body).unwrap();

        (handle.join().unwrap(), header, body)
    }

    #[test]
    fn test_sends_exact_range() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(&dir, b"0123456789abcdefghij");
        let partition = Partition {
            index: 1,
            offset: 4,
            length: 10,
        };

        let (result, header, body) = serve_and_read(source, partition, false);

        assert_eq!(result.unwrap(), 10);
        assert_eq!(
            header,
            DataHeader {
                partition: 1,
                length: 10,
                compressed: false
            }
        );
        assert_eq!(body, b"456789abcd");
    }

    #[test]
    fn test_compressed_length_prefix_is_post_compression_size() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![b'z'; 50_000];
        let source = source_file(&dir, &data);
        let partition = Partition {
            index: 0,
            offset: 0,
            length: 50_000,
        };

        let (result, header, body) = serve_and_read(source, partition, true);

        assert!(header.compressed);
        assert_eq!(header.length, body.len() as u64);
        assert_eq!(result.unwrap(), header.length);
        assert_eq!(decompress(&body).unwrap(), data);
    }

    #[test]
    fn test_empty_partition_sends_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(&dir, b"");
        let partition = Partition {
            index: 2,
            offset: 0,
            length: 0,
        };

        let (result, header, body) = serve_and_read(source, partition, false);

        assert_eq!(result.unwrap(), 0);
        assert_eq!(header.length, 0);
        assert!(body.is_empty());
    }

    #[test]
    fn test_cancelled_before_accept() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ServerConfig::default());
        let cancel = Cancellation::new();
        cancel.cancel();

        let worker = SenderWorker {
            partition: Partition {
                index: 0,
                offset: 0,
                length: 1,
            },
            listener: config.transport.bind(LOCALHOST).unwrap(),
            source: source_file(&dir, b"x"),
            compressed: false,
            cancel,
            config,
        };

        assert!(matches!(worker.run(), Err(TransferError::Cancelled)));
    }

    /// Raises the cancellation flag as it hands out its last byte.
    struct CancelWhenDrained {
        data: io::Cursor<Vec<u8>>,
        cancel: Cancellation,
    }

    impl Read for CancelWhenDrained {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            if self.data.position() == self.data.get_ref().len() as u64 {
                self.cancel.cancel();
            }
            Ok(n)
        }
    }

    #[test]
    fn test_cancel_after_last_block_still_succeeds() {
        let listener = TcpTransport.bind(LOCALHOST).unwrap();
        let addr = SocketAddr::new(LOCALHOST, listener.port());
        let client = thread::spawn(move || {
            let mut stream = TcpTransport.connect(addr, None).unwrap();
            let mut body = Vec::new();
            stream.read_to_end(&mut body).unwrap();
            body
        });
        let mut stream = listener.accept(&Cancellation::new(), None).unwrap();

        let cancel = Cancellation::new();
        let mut reader = CancelWhenDrained {
            data: io::Cursor::new(b"twelve bytes".to_vec()),
            cancel: cancel.clone(),
        };
        let sent = send_blocks(&mut reader, &mut stream, 12, 4, &cancel).unwrap();
        drop(stream);

        assert_eq!(sent, 12);
        assert!(cancel.is_cancelled());
        assert_eq!(client.join().unwrap(), b"twelve bytes");
    }

    #[test]
    fn test_cancel_mid_partition_fails() {
        let listener = TcpTransport.bind(LOCALHOST).unwrap();
        let addr = SocketAddr::new(LOCALHOST, listener.port());
        let client = thread::spawn(move || {
            let mut stream = TcpTransport.connect(addr, None).unwrap();
            let mut body = Vec::new();
            let _ = stream.read_to_end(&mut body);
        });
        let mut stream = listener.accept(&Cancellation::new(), None).unwrap();

        let cancel = Cancellation::new();
        let mut reader = CancelWhenDrained {
            data: io::Cursor::new(b"four".to_vec()),
            cancel: cancel.clone(),
        };
        let result = send_blocks(&mut reader, &mut stream, 12, 4, &cancel);
        drop(stream);
        client.join().unwrap();

        assert!(matches!(result, Err(TransferError::Cancelled)));
    }
}
