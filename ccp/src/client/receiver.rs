//! Receiver worker: downloads one partition into its partition file.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{TransferError, TransferResult};
use crate::progress::ProgressCounters;
use crate::protocol::{read_message, DataHeader};
use crate::transport::Transport;

/// What a receiver wrote to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedPartition {
    pub index: usize,
    /// Bytes written to the partition file (the declared length).
    pub bytes: u64,
    /// Whether the server sent this partition compressed.
    pub compressed: bool,
}

/// A finished receiver: its result, and whether it created its partition
/// file. Only files a receiver created are removed after a failure.
#[derive(Debug)]
pub(crate) struct ReceiverRun {
    pub created_file: bool,
    pub result: TransferResult<ReceivedPartition>,
}

/// Downloads the partition served on one data port.
pub(crate) struct ReceiverWorker {
    pub index: usize,
    pub addr: SocketAddr,
    pub path: PathBuf,
    pub block_size: usize,
    pub connect_timeout: Option<Duration>,
    pub transport: Arc<dyn Transport>,
    pub counters: Arc<ProgressCounters>,
}

impl ReceiverWorker {
    /// Connect, read the data header, then exactly `length` bytes.
    ///
    /// The partition file is only created once the header has arrived, and
    /// never over an existing file.
    pub fn run(self) -> ReceiverRun {
        let mut created_file = false;
        let result = self.receive(&mut created_file);
        ReceiverRun {
            created_file,
            result,
        }
    }

    fn receive(&self, created_file: &mut bool) -> TransferResult<ReceivedPartition> {
        let mut stream = self.transport.connect(self.addr, self.connect_timeout)?;
        let header = read_message(&mut stream)?.into_data_header()?;
        self.check_header(&header)?;

        debug!(
            partition = self.index,
            port = self.addr.port(),
            length = header.length,
            compressed = header.compressed,
            "Receiving partition"
        );
        self.counters.set_expected(self.index, header.length);

        let mut writer = BufWriter::new(self.create_file()?);
        *created_file = true;
        let mut buf = vec![0u8; self.block_size.max(1)];
        let mut received = 0u64;

        while received < header.length {
            let want = (header.length - received).min(buf.len() as u64) as usize;
            let n = match stream.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(TransferError::ConnectionBroken {
                        expected: header.length,
                        received,
                    })
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            writer.write_all(&buf[..n])?;
            received += n as u64;
            self.counters.add_transferred(self.index, n as u64);
            trace!(partition = self.index, received, "Block received");
        }

        writer.flush()?;
        self.counters.mark_completed(self.index);

        Ok(ReceivedPartition {
            index: self.index,
            bytes: received,
            compressed: header.compressed,
        })
    }

    fn create_file(&self) -> TransferResult<File> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => TransferError::PathConflict {
                    path: self.path.clone(),
                    reason: "partition file already exists".to_string(),
                },
                _ => e.into(),
            })
    }

    fn check_header(&self, header: &DataHeader) -> TransferResult<()> {
        if header.partition as usize != self.index {
            return Err(TransferError::Protocol(format!(
                "port {} announced partition {}, expected {}",
                self.addr.port(),
                header.partition,
                self.index
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{write_message, Message};
    use crate::transport::TcpTransport;
    use std::net::TcpListener;
    use std::thread;

    /// One-shot data server that sends a header then `body`, then closes.
    fn fake_sender(header: DataHeader, body: Vec<u8>) -> (SocketAddr, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            write_message(&mut stream, &Message::from(header)).unwrap();
            stream.write_all(&body).unwrap();
        });
        (addr, handle)
    }

    fn worker(index: usize, addr: SocketAddr, path: PathBuf) -> ReceiverWorker {
        ReceiverWorker {
            index,
            addr,
            path,
            block_size: 16,
            connect_timeout: Some(Duration::from_secs(5)),
            transport: Arc::new(TcpTransport),
            counters: Arc::new(ProgressCounters::new(index + 1)),
        }
    }

    #[test]
    fn test_receives_declared_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.part0");
        let body: Vec<u8> = (0..=255u8).collect();
        let header = DataHeader {
            partition: 0,
            length: body.len() as u64,
            compressed: false,
        };
        let (addr, server) = fake_sender(header, body.clone());

        let worker = worker(0, addr, path.clone());
        let counters = Arc::clone(&worker.counters);
        let run = worker.run();
        assert!(run.created_file);
        let received = run.result.unwrap();
        server.join().unwrap();

        assert_eq!(received.bytes, 256);
        assert!(!received.compressed);
        assert_eq!(std::fs::read(&path).unwrap(), body);
        assert_eq!(counters.total_transferred(), 256);
        assert_eq!(counters.completed_partitions(), 1);
    }

    #[test]
    fn test_short_stream_is_connection_broken() {
        let dir = tempfile::tempdir().unwrap();
        let header = DataHeader {
            partition: 2,
            length: 1000,
            compressed: false,
        };
        let (addr, server) = fake_sender(header, vec![0u8; 100]);

        let run = worker(2, addr, dir.path().join("out.part2")).run();
        server.join().unwrap();

        assert!(run.created_file);
        assert!(matches!(
            run.result,
            Err(TransferError::ConnectionBroken {
                expected: 1000,
                received: 100
            })
        ));
    }

    #[test]
    fn test_wrong_partition_index_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.part1");
        let header = DataHeader {
            partition: 3,
            length: 0,
            compressed: false,
        };
        let (addr, server) = fake_sender(header, Vec::new());

        let run = worker(1, addr, path.clone()).run();
        server.join().unwrap();

        assert!(!run.created_file);
        assert!(matches!(run.result, Err(TransferError::Protocol(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_partition_file_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.part0");
        std::fs::write(&path, b"left by an earlier download").unwrap();
        let header = DataHeader {
            partition: 0,
            length: 4,
            compressed: false,
        };
        let (addr, server) = fake_sender(header, b"new!".to_vec());

        let run = worker(0, addr, path.clone()).run();
        let _ = server.join();

        assert!(!run.created_file);
        assert!(matches!(run.result, Err(TransferError::PathConflict { .. })));
        assert_eq!(std::fs::read(&path).unwrap(), b"left by an earlier download");
    }
}
