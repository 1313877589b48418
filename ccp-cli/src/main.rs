//! ccp - parallel multi-stream file transfer over TCP.
//!
//! ```text
//! ccp serve [-p PORT] [--root DIR]            run the server
//! ccp get HOST:PORT LOCAL REMOTE [-n N] [-c]  download a file
//! ccp finish -t TARGET [-s PART...]           join leftover partitions
//! ccp compare -s A -t B                       compare two files
//! ccp config get|set|list|path|init           manage ~/.ccp/config.ini
//! ```

mod commands;
mod error;
mod runner;
mod ui;

use std::net::IpAddr;
use std::path::PathBuf;

use ccp::compare::DEFAULT_COMPARE_BLOCK_SIZE;
use clap::{Parser, Subcommand};
use console::style;

use commands::compare::CompareArgs;
use commands::config::ConfigCommands;
use commands::finish::FinishArgs;
use commands::get::GetArgs;
use commands::serve::ServeArgs;
use error::CliError;
use runner::GlobalArgs;

#[derive(Debug, Parser)]
#[command(name = "ccp", version, about = "Parallel multi-stream file transfer over TCP")]
struct Cli {
    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    /// Configuration file (default: ~/.ccp/config.ini)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a file from a ccp server
    Get {
        /// Server address as host:port
        address: String,

        /// Local file to create
        local: PathBuf,

        /// Path of the file on the server
        remote: String,

        /// Number of parallel streams
        #[arg(short = 'n', long)]
        streams: Option<usize>,

        /// Ask the server to gzip each partition
        #[arg(short = 'c', long, conflicts_with = "no_compress")]
        compressed: bool,

        /// Transfer uncompressed even if the config enables compression
        #[arg(long)]
        no_compress: bool,

        /// Decompress and join compressed partitions after download
        #[arg(short = 'd', long, conflicts_with = "no_decompress")]
        decompress: bool,

        /// Leave compressed partitions for `ccp finish` even if the config
        /// enables decompression
        #[arg(long)]
        no_decompress: bool,

        /// Keep partition files after joining
        #[arg(short = 'k', long)]
        keep: bool,

        /// Start without asking for confirmation
        #[arg(short = 'y', long)]
        yes: bool,

        /// Fail on partitions that do not decompress instead of writing them raw
        #[arg(long)]
        strict: bool,

        /// Hide progress bars
        #[arg(short = 'q', long)]
        quiet: bool,
    },

    /// Serve files to ccp clients
    Serve {
        /// Control port
        #[arg(short = 'p', long)]
        port: Option<u16>,

        /// Address to listen on
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Directory relative request paths resolve against
        #[arg(long)]
        root: Option<PathBuf>,

        /// Largest stream count accepted per request
        #[arg(long)]
        max_streams: Option<usize>,

        /// Abort active transfers on Ctrl+C without asking
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Join partition files into the target file
    Finish {
        /// File to reconstruct
        #[arg(short = 't', long)]
        target: PathBuf,

        /// Partition files (default: TARGET.part0, TARGET.part1, ...)
        #[arg(short = 's', long = "source", num_args = 1..)]
        partials: Vec<PathBuf>,

        /// Keep partition files after joining
        #[arg(short = 'k', long)]
        keep: bool,

        /// Fail on partitions that do not decompress instead of writing them raw
        #[arg(long)]
        strict: bool,

        /// Copy partitions verbatim without decompressing
        #[arg(long)]
        raw: bool,

        /// Replace an existing target file
        #[arg(long)]
        overwrite: bool,

        /// Hide the progress bar
        #[arg(short = 'q', long)]
        quiet: bool,
    },

    /// Compare two files block by block
    Compare {
        /// First file
        #[arg(short = 's', long)]
        source: PathBuf,

        /// Second file
        #[arg(short = 't', long)]
        target: PathBuf,

        /// Comparison block size in bytes
        #[arg(short = 'b', long, default_value_t = DEFAULT_COMPARE_BLOCK_SIZE)]
        block_size: usize,
    },

    /// Manage configuration settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let global = GlobalArgs {
        debug: cli.debug,
        config: cli.config,
    };

    match cli.command {
        Commands::Get {
            address,
            local,
            remote,
            streams,
            compressed,
            no_compress,
            decompress,
            no_decompress,
            keep,
            yes,
            strict,
            quiet,
        } => commands::get::run(
            GetArgs {
                address,
                local,
                remote,
                streams,
                compressed: switch(compressed, no_compress),
                decompress: switch(decompress, no_decompress),
                keep,
                yes,
                strict,
                quiet,
            },
            &global,
        ),
        Commands::Serve {
            port,
            bind,
            root,
            max_streams,
            force,
        } => commands::serve::run(
            ServeArgs {
                port,
                bind,
                root,
                max_streams,
                force,
            },
            &global,
        ),
        Commands::Finish {
            target,
            partials,
            keep,
            strict,
            raw,
            overwrite,
            quiet,
        } => commands::finish::run(
            FinishArgs {
                target,
                partials,
                keep,
                strict,
                raw,
                overwrite,
                quiet,
            },
            &global,
        ),
        Commands::Compare {
            source,
            target,
            block_size,
        } => commands::compare::run(CompareArgs {
            source,
            target,
            block_size,
        }),
        Commands::Config { command } => commands::config::run(command, &global),
    }
}

/// Collapse an `--x`/`--no-x` pair; `None` leaves the config value in charge.
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_parses_positionals_and_flags() {
        let cli = Cli::try_parse_from([
            "ccp", "get", "host:4567", "out.bin", "data/in.bin", "-n", "8", "-c", "-y",
        ])
        .unwrap();

        match cli.command {
            Commands::Get {
                address,
                local,
                remote,
                streams,
                compressed,
                decompress,
                yes,
                ..
            } => {
                assert_eq!(address, "host:4567");
                assert_eq!(local, PathBuf::from("out.bin"));
                assert_eq!(remote, "data/in.bin");
                assert_eq!(streams, Some(8));
                assert!(compressed);
                assert!(!decompress);
                assert!(yes);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_get_negative_compression_flags() {
        let cli = Cli::try_parse_from([
            "ccp", "get", "h:1", "a", "b", "--no-compress", "--no-decompress",
        ])
        .unwrap();

        match cli.command {
            Commands::Get {
                compressed,
                no_compress,
                decompress,
                no_decompress,
                ..
            } => {
                assert_eq!(switch(compressed, no_compress), Some(false));
                assert_eq!(switch(decompress, no_decompress), Some(false));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_get_compression_flag_pairs_conflict() {
        assert!(Cli::try_parse_from(["ccp", "get", "h:1", "a", "b", "-c", "--no-compress"]).is_err());
        assert!(
            Cli::try_parse_from(["ccp", "get", "h:1", "a", "b", "-d", "--no-decompress"]).is_err()
        );
    }

    #[test]
    fn test_switch_without_flags_defers_to_config() {
        assert_eq!(switch(false, false), None);
        assert_eq!(switch(true, false), Some(true));
    }

    #[test]
    fn test_get_requires_three_positionals() {
        assert!(Cli::try_parse_from(["ccp", "get", "host:4567", "out.bin"]).is_err());
    }

    #[test]
    fn test_stream_count_must_be_numeric() {
        assert!(Cli::try_parse_from(["ccp", "get", "h:1", "a", "b", "-n", "many"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["ccp", "serve", "-p", "9000", "--debug"]).unwrap();
        assert!(cli.debug);
        match cli.command {
            Commands::Serve { port, force, .. } => {
                assert_eq!(port, Some(9000));
                assert!(!force);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_finish_takes_multiple_sources() {
        let cli = Cli::try_parse_from([
            "ccp", "finish", "-t", "out", "-s", "out.part1", "out.part0", "-k",
        ])
        .unwrap();
        match cli.command {
            Commands::Finish {
                target,
                partials,
                keep,
                ..
            } => {
                assert_eq!(target, PathBuf::from("out"));
                assert_eq!(partials.len(), 2);
                assert!(keep);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_compare_default_block_size() {
        let cli = Cli::try_parse_from(["ccp", "compare", "-s", "a", "-t", "b"]).unwrap();
        match cli.command {
            Commands::Compare { block_size, .. } => {
                assert_eq!(block_size, DEFAULT_COMPARE_BLOCK_SIZE)
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_bind_address_rejected() {
        assert!(Cli::try_parse_from(["ccp", "serve", "--bind", "not-an-ip"]).is_err());
    }
}
