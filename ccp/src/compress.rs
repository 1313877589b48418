//! Gzip compression for partitions.
//!
//! Each partition is compressed independently into a single gzip member so
//! the joiner can decompress it without looking at its neighbours. A blob
//! counts as compressed only if it starts with the gzip magic bytes.

use std::io::{self, Read, Seek, SeekFrom, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::SpooledTempFile;

/// Default compression level (1 = fastest, favours throughput over ratio).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 1;

/// First two bytes of every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Default in-memory size of a spooled buffer before it moves to disk (64MB).
pub const DEFAULT_SPOOL_LIMIT: usize = 64 * 1024 * 1024;

/// A compressed partition ready to be sent.
///
/// Held in memory up to the spool limit, then in an anonymous temp file.
pub struct CompressedBlob {
    spool: SpooledTempFile,
    /// Size after compression; this is what the length prefix declares.
    pub compressed_len: u64,
    /// Bytes consumed from the source.
    pub source_len: u64,
}

impl CompressedBlob {
    /// Reader positioned at the first compressed byte.
    pub fn reader(&mut self) -> io::Result<&mut SpooledTempFile> {
        self.spool.seek(SeekFrom::Start(0))?;
        Ok(&mut self.spool)
    }
}

/// Compress everything `source` yields into a spooled buffer.
pub fn compress_to_spool<R: Read>(
    source: &mut R,
    level: u32,
    spool_limit: usize,
) -> io::Result<CompressedBlob> {
    let mut spool = SpooledTempFile::new(spool_limit);
    let mut encoder = GzEncoder::new(&mut spool, Compression::new(level.min(9)));
    let source_len = io::copy(source, &mut encoder)?;
    encoder.finish()?;

    let compressed_len = spool.seek(SeekFrom::End(0))?;
    Ok(CompressedBlob {
        spool,
        compressed_len,
        source_len,
    })
}

/// Compress a byte slice in one go.
pub fn compress(data: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(data)?;
    encoder.finish()
}

/// Returns true if `prefix` starts with the gzip magic bytes.
pub fn has_gzip_magic(prefix: &[u8]) -> bool {
    prefix.len() >= GZIP_MAGIC.len() && prefix[..GZIP_MAGIC.len()] == GZIP_MAGIC
}

/// Decompress every gzip member in `source` into `sink`.
///
/// Returns the number of decompressed bytes. Fails on a bad header,
/// corrupt deflate data, truncation, or a CRC/size trailer mismatch.
pub fn decompress_into<R: Read, W: Write>(source: R, sink: &mut W) -> io::Result<u64> {
    let mut decoder = MultiGzDecoder::new(source);
    io::copy(&mut decoder, sink)
}

/// Decompress a byte slice in one go.
pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    decompress_into(data, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_compress_starts_with_magic() {
        let compressed = compress(b"hello hello hello", DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert!(has_gzip_magic(&compressed));
        assert_eq!(decompress(&compressed).unwrap(), b"hello hello hello");
    }

    #[test]
    fn test_empty_input_still_produces_member() {
        let compressed = compress(b"", DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert!(has_gzip_magic(&compressed));
        assert!(decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn test_spool_reports_lengths() {
        let data = vec![b'a'; 100_000];
        let mut blob = compress_to_spool(&mut Cursor::new(&data), 6, 1024).unwrap();

        assert_eq!(blob.source_len, 100_000);
        assert!(blob.compressed_len < 100_000);

        let mut compressed = Vec::new();
        blob.reader().unwrap().read_to_end(&mut compressed).unwrap();
        assert_eq!(compressed.len() as u64, blob.compressed_len);
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_concatenated_members_decompress_in_order() {
        let mut joined = compress(b"first-", 1).unwrap();
        joined.extend(compress(b"second", 1).unwrap());
        assert_eq!(decompress(&joined).unwrap(), b"first-second");
    }

    #[test]
    fn test_magic_detection() {
        assert!(has_gzip_magic(&[0x1f, 0x8b, 0x08]));
        assert!(!has_gzip_magic(&[0x1f]));
        assert!(!has_gzip_magic(b"plain text"));
    }

    #[test]
    fn test_corrupted_member_fails() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let mut compressed = compress(&data, 6).unwrap();
        let middle = compressed.len() / 2;
        compressed[middle] ^= 0xff;

        assert!(decompress(&compressed).is_err());
    }

    #[test]
    fn test_truncated_member_fails() {
        let compressed = compress(&[42u8; 10_000], 1).unwrap();
        let truncated = &compressed[..compressed.len() - 4];
        assert!(decompress(truncated).is_err());
    }
}
