//! Reassembly of partition files into the final file.
//!
//! Partitions are processed strictly in the order given (partition index
//! order); arrival time and directory listing order never matter. Each
//! partition is decompressed on its own when it carries a gzip header,
//! otherwise its bytes are copied as-is. The target is written in a single
//! sequential pass, flushed and synced before any partition file is removed.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::SpooledTempFile;
use tracing::{debug, info, warn};

use crate::compress::{self, DEFAULT_SPOOL_LIMIT, GZIP_MAGIC};
use crate::error::{TransferError, TransferResult};

/// Buffer size for copying partitions into the target (1MB).
const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Joiner progress callback: `(bytes_read, total_bytes)` over partition files.
pub type JoinProgressCallback<'a> = &'a dyn Fn(u64, u64);

/// Whether to try decompressing partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decompression {
    /// Decompress partitions that start with the gzip magic bytes.
    #[default]
    Auto,
    /// Copy every partition verbatim.
    Off,
}

/// What to do with a partition that looks compressed but fails to decompress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Write the raw bytes and log a warning.
    #[default]
    Lenient,
    /// Fail the join with `CorruptPartition`.
    Strict,
}

/// Options for a join.
#[derive(Debug, Clone)]
pub struct JoinOptions {
    pub decompression: Decompression,
    pub fallback: FallbackPolicy,
    /// Keep partition files after a successful join.
    pub keep_partials: bool,
    /// In-memory limit for a decompressed partition before spilling to disk.
    pub spool_limit: usize,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            decompression: Decompression::Auto,
            fallback: FallbackPolicy::Lenient,
            keep_partials: false,
            spool_limit: DEFAULT_SPOOL_LIMIT,
        }
    }
}

impl JoinOptions {
    pub fn with_decompression(mut self, decompression: Decompression) -> Self {
        self.decompression = decompression;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_keep_partials(mut self, keep: bool) -> Self {
        self.keep_partials = keep;
        self
    }
}

/// How a single partition ended up in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionWrite {
    Decompressed,
    Raw,
    /// Looked compressed, failed to decompress, written raw.
    RawFallback,
}

/// Summary of a completed join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinReport {
    /// Bytes read from partition files.
    pub bytes_read: u64,
    /// Bytes written to the target.
    pub bytes_written: u64,
    /// Per-partition outcome, in index order.
    pub writes: Vec<PartitionWrite>,
    /// Whether the partition files were removed.
    pub partials_removed: bool,
}

impl JoinReport {
    pub fn fallback_count(&self) -> usize {
        self.writes
            .iter()
            .filter(|w| **w == PartitionWrite::RawFallback)
            .count()
    }
}

/// Reconstructs a file from its partitions.
#[derive(Default)]
pub struct Joiner<'a> {
    options: JoinOptions,
    on_progress: Option<JoinProgressCallback<'a>>,
}

impl<'a> Joiner<'a> {
    pub fn new(options: JoinOptions) -> Self {
        Self {
            options,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, callback: JoinProgressCallback<'a>) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Join `partials` (in partition index order) into `target`.
    ///
    /// The target is created or truncated, so re-running on unchanged
    /// partitions produces identical output.
    pub fn join(&self, partials: &[PathBuf], target: &Path) -> TransferResult<JoinReport> {
        let total_bytes = partials
            .iter()
            .map(|path| fs::metadata(path).map(|m| m.len()))
            .sum::<io::Result<u64>>()?;

        info!(
            partitions = partials.len(),
            bytes = total_bytes,
            target = %target.display(),
            "Joining partitions"
        );

        let mut report = JoinReport::default();
        let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, File::create(target)?);

        for path in partials {
            let (write, written) = self.write_partition(path, &mut writer)?;
            let read = fs::metadata(path)?.len();

            debug!(
                partition = %path.display(),
                read,
                written,
                mode = ?write,
                "Partition joined"
            );

            report.bytes_read += read;
            report.bytes_written += written;
            report.writes.push(write);

            if let Some(cb) = self.on_progress {
                cb(report.bytes_read, total_bytes);
            }
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        if !self.options.keep_partials {
            remove_partials(partials)?;
            report.partials_removed = true;
        }

        info!(
            bytes_read = report.bytes_read,
            bytes_written = report.bytes_written,
            fallbacks = report.fallback_count(),
            "Join complete"
        );

        Ok(report)
    }

    fn write_partition<W: Write>(
        &self,
        path: &Path,
        writer: &mut W,
    ) -> TransferResult<(PartitionWrite, u64)> {
        let mut file = File::open(path)?;

        if self.options.decompression == Decompression::Off || !starts_with_magic(&mut file)? {
            let written = io::copy(&mut BufReader::new(file), writer)?;
            return Ok((PartitionWrite::Raw, written));
        }

        // Decode into a spool first: a failure halfway must not leave
        // half-decompressed bytes in the target.
        let mut spool = SpooledTempFile::new(self.options.spool_limit);
        match compress::decompress_into(BufReader::new(&mut file), &mut spool) {
            Ok(decompressed) => {
                spool.seek(SeekFrom::Start(0))?;
                io::copy(&mut spool, writer)?;
                Ok((PartitionWrite::Decompressed, decompressed))
            }
            Err(e) => match self.options.fallback {
                FallbackPolicy::Strict => Err(TransferError::CorruptPartition {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }),
                FallbackPolicy::Lenient => {
                    warn!(
                        partition = %path.display(),
                        error = %e,
                        "Partition has a gzip header but does not decompress, writing raw bytes"
                    );
                    file.seek(SeekFrom::Start(0))?;
                    let written = io::copy(&mut BufReader::new(file), writer)?;
                    Ok((PartitionWrite::RawFallback, written))
                }
            },
        }
    }
}

/// Join with default options.
pub fn join(partials: &[PathBuf], target: &Path) -> TransferResult<JoinReport> {
    Joiner::default().join(partials, target)
}

/// Remove partition files, ignoring ones that are already gone.
pub fn remove_partials(partials: &[PathBuf]) -> TransferResult<()> {
    for path in partials {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Peek at the first bytes and rewind.
fn starts_with_magic(file: &mut File) -> io::Result<bool> {
    let mut prefix = [0u8; GZIP_MAGIC.len()];
    let mut filled = 0;
    while filled < prefix.len() {
        match file.read(&mut prefix[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(compress::has_gzip_magic(&prefix[..filled]))
}
