//! `ccp get`: download a file from a running server.

use std::net::SocketAddr;
use std::path::PathBuf;

use ccp::address::parse_address;
use ccp::client::{AutoConfirm, DownloadOptions, DownloadOutcome, DownloadReport, Downloader};
use ccp::config::{format_size, ClientSettings};
use ccp::join::FallbackPolicy;
use console::style;
use tracing::info;

use crate::error::CliError;
use crate::runner::{CliRunner, GlobalArgs};
use crate::ui::{ConsoleConfirmation, TransferBars};

/// Arguments for `ccp get`.
pub struct GetArgs {
    pub address: String,
    pub local: PathBuf,
    pub remote: String,
    pub streams: Option<usize>,
    /// `None` when neither `--compressed` nor `--no-compress` was given.
    pub compressed: Option<bool>,
    pub decompress: Option<bool>,
    pub keep: bool,
    pub yes: bool,
    pub strict: bool,
    pub quiet: bool,
}

pub fn run(args: GetArgs, global: &GlobalArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(global)?;
    runner.log_startup("get");
    let settings = &runner.config().client;

    let server = parse_address(&args.address)?;
    let streams = args.streams.unwrap_or(settings.streams);
    if streams == 0 {
        return Err(CliError::InvalidArgument(
            "stream count must be at least 1".to_string(),
        ));
    }

    let options = download_options(&args, settings, server, streams);

    info!(
        server = %server,
        remote = %args.remote,
        target = %args.local.display(),
        streams,
        "Requesting download"
    );

    let bars = TransferBars::new(streams, args.quiet);
    let downloader = Downloader::new(options).with_progress(bars.callback());
    let downloader = if args.yes {
        downloader.with_confirmation(AutoConfirm)
    } else {
        downloader.with_confirmation(ConsoleConfirmation)
    };

    let outcome = downloader.download();
    bars.finish();

    match outcome? {
        DownloadOutcome::Completed(report) => {
            print_report(&report);
            Ok(())
        }
        DownloadOutcome::PartitionsPending {
            partials,
            bytes_received,
        } => {
            println!();
            println!(
                "Received {} compressed partition(s), {}.",
                partials.len(),
                format_size(bytes_received)
            );
            for path in &partials {
                println!("  {}", path.display());
            }
            println!();
            println!(
                "Join them with: ccp finish -t {}",
                args.local.display()
            );
            Ok(())
        }
        DownloadOutcome::NotFound { path } => Err(CliError::NotFound(path)),
        DownloadOutcome::Declined => Err(CliError::Declined),
    }
}

/// Command-line flags win over `[client]` settings.
fn download_options(
    args: &GetArgs,
    settings: &ClientSettings,
    server: SocketAddr,
    streams: usize,
) -> DownloadOptions {
    let fallback = if args.strict {
        FallbackPolicy::Strict
    } else {
        FallbackPolicy::Lenient
    };

    DownloadOptions::new(server, args.remote.clone(), args.local.clone())
        .with_streams(streams)
        .with_compression(args.compressed.unwrap_or(settings.compressed))
        .with_decompress(args.decompress.unwrap_or(settings.decompress))
        .with_block_size(settings.block_size)
        .with_connect_timeout(settings.connect_timeout())
        .with_keep_partials(args.keep || settings.keep_partials)
        .with_fallback(fallback)
}

fn print_report(report: &DownloadReport) {
    let secs = report.elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        (report.bytes_received as f64 / secs) as u64
    } else {
        0
    };

    println!();
    println!(
        "{} {} ({})",
        style("Downloaded").green().bold(),
        report.target.display(),
        format_size(report.join.bytes_written)
    );
    println!(
        "  Received:   {} in {:.1}s ({}/s)",
        format_size(report.bytes_received),
        secs,
        format_size(rate)
    );

    let fallbacks = report.join.fallback_count();
    if fallbacks > 0 {
        println!(
            "  {} {} partition(s) failed to decompress and were written raw",
            style("Warning:").yellow().bold(),
            fallbacks
        );
    }
    if !report.join.partials_removed {
        println!("  Partition files kept next to the target.");
    }
}
