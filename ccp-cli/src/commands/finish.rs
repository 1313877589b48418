//! `ccp finish`: join partition files left by an earlier download.

use std::path::PathBuf;

use ccp::address::validate_target;
use ccp::config::format_size;
use ccp::join::{Decompression, FallbackPolicy, JoinOptions, Joiner};
use ccp::partition::{discover_partials, order_partials};
use console::style;
use tracing::info;

use crate::error::CliError;
use crate::runner::{CliRunner, GlobalArgs};
use crate::ui::join_bar;

/// Arguments for `ccp finish`.
pub struct FinishArgs {
    pub target: PathBuf,
    /// Explicit partition files; discovered next to the target when empty.
    pub partials: Vec<PathBuf>,
    pub keep: bool,
    pub strict: bool,
    /// Copy partitions verbatim without trying to decompress.
    pub raw: bool,
    pub overwrite: bool,
    pub quiet: bool,
}

pub fn run(args: FinishArgs, global: &GlobalArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(global)?;
    runner.log_startup("finish");

    let partials = if args.partials.is_empty() {
        discover_partials(&args.target)
    } else {
        order_partials(&args.partials)?
    };
    if partials.is_empty() {
        return Err(CliError::InvalidArgument(format!(
            "no partition files found for {}",
            args.target.display()
        )));
    }

    if !args.overwrite {
        validate_target(&args.target)?;
    }

    let options = JoinOptions::default()
        .with_decompression(if args.raw {
            Decompression::Off
        } else {
            Decompression::Auto
        })
        .with_fallback(if args.strict {
            FallbackPolicy::Strict
        } else {
            FallbackPolicy::Lenient
        })
        .with_keep_partials(args.keep);

    info!(
        target = %args.target.display(),
        partitions = partials.len(),
        "Joining partitions"
    );

    let bar = join_bar(0, args.quiet);
    let on_progress = |read: u64, total: u64| {
        bar.set_length(total);
        bar.set_position(read);
    };
    let result = Joiner::new(options)
        .with_progress(&on_progress)
        .join(&partials, &args.target);
    bar.finish_and_clear();
    let report = result?;

    println!(
        "{} {} from {} partition(s) ({})",
        style("Joined").green().bold(),
        args.target.display(),
        partials.len(),
        format_size(report.bytes_written)
    );
    let fallbacks = report.fallback_count();
    if fallbacks > 0 {
        println!(
            "  {} {} partition(s) failed to decompress and were written raw",
            style("Warning:").yellow().bold(),
            fallbacks
        );
    }
    if report.partials_removed {
        println!("  Partition files removed.");
    }

    Ok(())
}
