//! Terminal progress bars for transfers and joins.

use std::sync::{Arc, OnceLock};

use ccp::progress::{ProgressSnapshot, TransferProgressCallback};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{prefix:>8} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}";
const TOTAL_TEMPLATE: &str =
    "{prefix:>8} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// One bar per partition plus a total, created on the first report so
/// nothing is drawn before the download is confirmed.
pub struct TransferBars {
    multi: MultiProgress,
    streams: usize,
    bars: OnceLock<(Vec<ProgressBar>, ProgressBar)>,
}

impl TransferBars {
    pub fn new(streams: usize, quiet: bool) -> Arc<Self> {
        let multi = MultiProgress::new();
        if quiet {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }
        Arc::new(Self {
            multi,
            streams,
            bars: OnceLock::new(),
        })
    }

    /// Callback for [`ccp::client::Downloader::with_progress`].
    pub fn callback(self: &Arc<Self>) -> TransferProgressCallback {
        let this = Arc::clone(self);
        Box::new(move |snapshot| this.update(snapshot))
    }

    fn bars(&self) -> &(Vec<ProgressBar>, ProgressBar) {
        self.bars.get_or_init(|| {
            let parts = (0..self.streams)
                .map(|i| {
                    let bar = self.multi.add(ProgressBar::new(0));
                    bar.set_style(bar_style(BAR_TEMPLATE));
                    bar.set_prefix(format!("part {}", i));
                    bar
                })
                .collect();
            let total = self.multi.add(ProgressBar::new(0));
            total.set_style(bar_style(TOTAL_TEMPLATE));
            total.set_prefix("total");
            (parts, total)
        })
    }

    fn update(&self, snapshot: &ProgressSnapshot) {
        let (parts, total) = self.bars();

        for (bar, partition) in parts.iter().zip(&snapshot.partitions) {
            bar.set_length(partition.expected);
            bar.set_position(partition.transferred);
            if partition.completed && !bar.is_finished() {
                bar.finish_with_message("done");
            }
        }

        total.set_length(snapshot.expected());
        total.set_position(snapshot.transferred());
    }

    /// Finish (or abandon) all bars.
    pub fn finish(&self) {
        if let Some((parts, total)) = self.bars.get() {
            for bar in parts.iter().filter(|b| !b.is_finished()) {
                bar.abandon();
            }
            total.finish();
        }
    }
}

/// Single bar for joining partitions.
pub fn join_bar(total_bytes: u64, quiet: bool) -> ProgressBar {
    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(total_bytes)
    };
    bar.set_style(bar_style(TOTAL_TEMPLATE));
    bar.set_prefix("join");
    bar
}
