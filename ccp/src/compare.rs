//! Byte-for-byte file comparison.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use tracing::debug;

use crate::error::{TransferError, TransferResult};

/// Default comparison block size.
pub const DEFAULT_COMPARE_BLOCK_SIZE: usize = 1024;

/// Result of comparing two files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Identical { size: u64 },
    SizeMismatch { left: u64, right: u64 },
    /// Same size, first differing byte at `offset`.
    Differ { offset: u64 },
}

impl Comparison {
    pub fn is_identical(&self) -> bool {
        matches!(self, Comparison::Identical { .. })
    }
}

/// Compare two files block by block.
pub fn compare_files(left: &Path, right: &Path, block_size: usize) -> TransferResult<Comparison> {
    if block_size == 0 {
        return Err(TransferError::InvalidArgument(
            "block size must be at least 1".to_string(),
        ));
    }

    let left_size = std::fs::metadata(left)?.len();
    let right_size = std::fs::metadata(right)?.len();
    if left_size != right_size {
        return Ok(Comparison::SizeMismatch {
            left: left_size,
            right: right_size,
        });
    }

    let mut a = BufReader::new(File::open(left)?);
    let mut b = BufReader::new(File::open(right)?);
    let mut buf_a = vec![0u8; block_size];
    let mut buf_b = vec![0u8; block_size];
    let mut offset = 0u64;

    loop {
        let n = fill(&mut a, &mut buf_a)?;
        let m = fill(&mut b, &mut buf_b)?;
        let common = n.min(m);

        if let Some(pos) = buf_a[..common]
            .iter()
            .zip(&buf_b[..common])
            .position(|(x, y)| x != y)
        {
            return Ok(Comparison::Differ {
                offset: offset + pos as u64,
            });
        }
        if n != m {
            // One file changed size while being read.
            return Ok(Comparison::Differ {
                offset: offset + common as u64,
            });
        }
        if n == 0 {
            break;
        }
        offset += n as u64;
    }

    debug!(size = left_size, block_size, "Files identical");
    Ok(Comparison::Identical { size: left_size })
}

/// Read until `buf` is full or EOF.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
