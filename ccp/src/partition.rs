//! Partition planning and partial-file naming.
//!
//! A file of `total_size` bytes is split into `stream_count` contiguous byte
//! ranges. With `division, remainder = total_size / n, total_size % n`, the
//! first `remainder` partitions (by ascending index) carry `division + 1`
//! bytes and the rest carry `division`. The extra byte placement is the only
//! tie-break; downstream code depends on index order alone.
//!
//! ```text
//! total_size = 10, stream_count = 3
//!
//!   [0 1 2 3][4 5 6][7 8 9]
//!    part0    part1  part2
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{TransferError, TransferResult};

/// Suffix inserted between the target path and the partition index.
pub const PARTIAL_SUFFIX: &str = ".part";

/// One contiguous byte range of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Position in `[0, stream_count)`; also the data port rank.
    pub index: usize,
    /// First byte of the range.
    pub offset: u64,
    /// Number of bytes in the range.
    pub length: u64,
}

impl Partition {
    /// One past the last byte of the range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Returns true if the partition carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Compute partition boundaries for a file.
///
/// Returns exactly `stream_count` partitions covering `[0, total_size)`
/// without gaps or overlaps, ordered by index. An empty file yields
/// `stream_count` zero-length partitions.
///
/// # Errors
///
/// `InvalidArgument` when `stream_count` is zero.
pub fn plan(total_size: u64, stream_count: usize) -> TransferResult<Vec<Partition>> {
    if stream_count == 0 {
        return Err(TransferError::InvalidArgument(
            "stream count must be at least 1".to_string(),
        ));
    }

    let n = stream_count as u64;
    let division = total_size / n;
    let remainder = total_size % n;

    let mut offset = 0;
    let partitions = (0..stream_count)
        .map(|index| {
            let length = if (index as u64) < remainder {
                division + 1
            } else {
                division
            };
            let partition = Partition {
                index,
                offset,
                length,
            };
            offset += length;
            partition
        })
        .collect();

    Ok(partitions)
}

/// Path of the partial file for partition `index` of `target`.
///
/// `/data/file.iso` + `3` -> `/data/file.iso.part3`
pub fn partial_path(target: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(format!("{}{}", PARTIAL_SUFFIX, index));
    PathBuf::from(name)
}

/// Partial file paths for every partition of `target`, in index order.
pub fn partial_paths(target: &Path, stream_count: usize) -> Vec<PathBuf> {
    (0..stream_count)
        .map(|index| partial_path(target, index))
        .collect()
}

/// Parse the partition index from a `<name>.part<index>` path.
pub fn partial_index(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    let (_, digits) = name.rsplit_once(PARTIAL_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Order partial files by their partition index.
///
/// Lexicographic order is wrong past ten partitions (`part10` < `part2`),
/// so the numeric suffix is parsed instead.
///
/// # Errors
///
/// `InvalidArgument` if a path has no `.part<index>` suffix or two paths
/// share an index.
pub fn order_partials(paths: &[PathBuf]) -> TransferResult<Vec<PathBuf>> {
    let mut indexed = paths
        .iter()
        .map(|path| {
            partial_index(path).map(|index| (index, path.clone())).ok_or_else(|| {
                TransferError::InvalidArgument(format!(
                    "{} is not a partition file (expected a {}<index> suffix)",
                    path.display(),
                    PARTIAL_SUFFIX
                ))
            })
        })
        .collect::<TransferResult<Vec<_>>>()?;

    indexed.sort_by_key(|(index, _)| *index);

    if let Some(pair) = indexed.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(TransferError::InvalidArgument(format!(
            "duplicate partition index {}: {} and {}",
            pair[0].0,
            pair[0].1.display(),
            pair[1].1.display()
        )));
    }

    Ok(indexed.into_iter().map(|(_, path)| path).collect())
}

/// Find `<target>.part0`, `<target>.part1`, ... on disk, stopping at the
/// first missing index.
pub fn discover_partials(target: &Path) -> Vec<PathBuf> {
    (0..)
        .map(|index| partial_path(target, index))
        .take_while(|path| path.is_file())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lengths(partitions: &[Partition]) -> Vec<u64> {
        partitions.iter().map(|p| p.length).collect()
    }

    #[test]
    fn test_plan_ten_bytes_three_streams() {
        let partitions = plan(10, 3).unwrap();
        assert_eq!(lengths(&partitions), vec![4, 3, 3]);
        assert_eq!(partitions[1].offset, 4);
        assert_eq!(partitions[2].offset, 7);
        assert_eq!(partitions[2].end(), 10);
    }

    #[test]
    fn test_plan_empty_file() {
        let partitions = plan(0, 4).unwrap();
        assert_eq!(partitions.len(), 4);
        assert!(partitions.iter().all(|p| p.is_empty() && p.offset == 0));
    }

    #[test]
    fn test_plan_more_streams_than_bytes() {
        let partitions = plan(2, 5).unwrap();
        assert_eq!(lengths(&partitions), vec![1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_plan_single_stream() {
        let partitions = plan(12345, 1).unwrap();
        assert_eq!(
            partitions,
            vec![Partition {
                index: 0,
                offset: 0,
                length: 12345
            }]
        );
    }

    #[test]
    fn test_plan_zero_streams_rejected() {
        let result = plan(100, 0);
        assert!(matches!(result, Err(TransferError::InvalidArgument(_))));
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        let path = partial_path(Path::new("/data/file.iso"), 3);
        assert_eq!(path, PathBuf::from("/data/file.iso.part3"));
    }

    #[test]
    fn test_partial_index_parsing() {
        assert_eq!(partial_index(Path::new("/a/b.bin.part12")), Some(12));
        assert_eq!(partial_index(Path::new("b.part0")), Some(0));
        assert_eq!(partial_index(Path::new("b.part")), None);
        assert_eq!(partial_index(Path::new("b.partx")), None);
        assert_eq!(partial_index(Path::new("b.bin")), None);
    }

    #[test]
    fn test_order_partials_numeric_not_lexicographic() {
        let paths: Vec<PathBuf> = [10, 2, 0, 1]
            .iter()
            .map(|i| partial_path(Path::new("out"), *i))
            .collect();

        let ordered = order_partials(&paths).unwrap();
        let indices: Vec<_> = ordered.iter().filter_map(|p| partial_index(p)).collect();
        assert_eq!(indices, vec![0, 1, 2, 10]);
    }

    #[test]
    fn test_order_partials_rejects_duplicates_and_strangers() {
        let dup = vec![PathBuf::from("a.part1"), PathBuf::from("b.part1")];
        assert!(matches!(
            order_partials(&dup),
            Err(TransferError::InvalidArgument(_))
        ));

        let stranger = vec![PathBuf::from("a.part0"), PathBuf::from("notes.txt")];
        assert!(matches!(
            order_partials(&stranger),
            Err(TransferError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_discover_partials_stops_at_gap() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.bin");
        for index in [0, 1, 3] {
            std::fs::write(partial_path(&target, index), b"x").unwrap();
        }

        let found = discover_partials(&target);
        assert_eq!(found, partial_paths(&target, 2));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_partitions_cover_file_exactly(
                total_size in 0u64..10_000_000,
                stream_count in 1usize..128
            ) {
                let partitions = plan(total_size, stream_count)?;

                prop_assert_eq!(partitions.len(), stream_count);
                prop_assert_eq!(partitions.iter().map(|p| p.length).sum::<u64>(), total_size);

                let mut expected_offset = 0;
                for (i, partition) in partitions.iter().enumerate() {
                    prop_assert_eq!(partition.index, i);
                    prop_assert_eq!(
                        partition.offset, expected_offset,
                        "gap or overlap before partition {}", i
                    );
                    expected_offset = partition.end();
                }
                prop_assert_eq!(expected_offset, total_size);
            }

            #[test]
            fn test_extra_bytes_go_to_leading_partitions(
                total_size in 0u64..10_000_000,
                stream_count in 1usize..128
            ) {
                let partitions = plan(total_size, stream_count)?;
                let division = total_size / stream_count as u64;
                let remainder = (total_size % stream_count as u64) as usize;

                let larger = partitions.iter().filter(|p| p.length == division + 1).count();
                prop_assert_eq!(larger, remainder);
                for partition in &partitions {
                    let expected = if partition.index < remainder { division + 1 } else { division };
                    prop_assert_eq!(partition.length, expected);
                }
            }
        }
    }
}
