//! `ccp compare`: block-by-block file comparison.

use std::path::PathBuf;

use ccp::compare::{compare_files, Comparison};
use ccp::config::format_size;
use console::style;

use crate::error::CliError;

/// Arguments for `ccp compare`.
pub struct CompareArgs {
    pub source: PathBuf,
    pub target: PathBuf,
    pub block_size: usize,
}

pub fn run(args: CompareArgs) -> Result<(), CliError> {
    for path in [&args.source, &args.target] {
        if !path.is_file() {
            return Err(CliError::InvalidArgument(format!(
                "not a file: {}",
                path.display()
            )));
        }
    }

    match compare_files(&args.source, &args.target, args.block_size)? {
        Comparison::Identical { size } => {
            println!(
                "{} ({})",
                style("Files are identical").green().bold(),
                format_size(size)
            );
            Ok(())
        }
        Comparison::SizeMismatch { left, right } => Err(CliError::Different(format!(
            "Files differ in size: {} is {} bytes, {} is {} bytes",
            args.source.display(),
            left,
            args.target.display(),
            right
        ))),
        Comparison::Differ { offset } => Err(CliError::Different(format!(
            "Files differ, first difference at byte {}",
            offset
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EXIT_DIFFERENT;
    use tempfile::TempDir;

    fn args(dir: &TempDir, a: &[u8], b: &[u8]) -> CompareArgs {
        let source = dir.path().join("a");
        let target = dir.path().join("b");
        std::fs::write(&source, a).unwrap();
        std::fs::write(&target, b).unwrap();
        CompareArgs {
            source,
            target,
            block_size: 4,
        }
    }

    #[test]
    fn test_identical_files_succeed() {
        let dir = TempDir::new().unwrap();
        assert!(run(args(&dir, b"same bytes", b"same bytes")).is_ok());
    }

    #[test]
    fn test_different_files_exit_with_different_code() {
        let dir = TempDir::new().unwrap();
        let err = run(args(&dir, b"aaaabbbb", b"aaaabbbc")).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_DIFFERENT);
        assert!(err.to_string().contains("byte 7"));
    }

    #[test]
    fn test_missing_file_is_invalid_argument() {
        let dir = TempDir::new().unwrap();
        let err = run(CompareArgs {
            source: dir.path().join("nope"),
            target: dir.path().join("nope2"),
            block_size: 4,
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
