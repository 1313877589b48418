//! Progress reporting for parallel partition transfers.
//!
//! Workers record bytes into lock-free per-partition counters; a dedicated
//! reporter thread polls them and hands a [`ProgressSnapshot`] to an injected
//! callback, so workers never block on display code.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default interval between progress callbacks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Callback invoked by the reporter thread.
pub type TransferProgressCallback = Box<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// Progress of a single partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionProgress {
    pub index: usize,
    /// Bytes declared by the data header; 0 until the header arrives.
    pub expected: u64,
    pub transferred: u64,
    pub completed: bool,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub partitions: Vec<PartitionProgress>,
}

impl ProgressSnapshot {
    /// Bytes moved across all partitions.
    pub fn transferred(&self) -> u64 {
        self.partitions.iter().map(|p| p.transferred).sum()
    }

    /// Bytes declared so far across all partitions.
    pub fn expected(&self) -> u64 {
        self.partitions.iter().map(|p| p.expected).sum()
    }

    pub fn completed_partitions(&self) -> usize {
        self.partitions.iter().filter(|p| p.completed).count()
    }

    pub fn is_complete(&self) -> bool {
        self.partitions.iter().all(|p| p.completed)
    }
}

/// Shared progress counters for parallel transfers.
#[derive(Debug)]
pub struct ProgressCounters {
    expected: Vec<AtomicU64>,
    transferred: Vec<AtomicU64>,
    completed: Vec<AtomicBool>,
    completed_count: AtomicUsize,
    done: AtomicBool,
}

impl ProgressCounters {
    /// Create counters for the given number of partitions.
    pub fn new(num_partitions: usize) -> Self {
        Self {
            expected: (0..num_partitions).map(|_| AtomicU64::new(0)).collect(),
            transferred: (0..num_partitions).map(|_| AtomicU64::new(0)).collect(),
            completed: (0..num_partitions).map(|_| AtomicBool::new(false)).collect(),
            completed_count: AtomicUsize::new(0),
            done: AtomicBool::new(false),
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.transferred.len()
    }

    /// Record the byte count a partition's header declared.
    pub fn set_expected(&self, index: usize, bytes: u64) {
        if let Some(counter) = self.expected.get(index) {
            counter.store(bytes, Ordering::SeqCst);
        }
    }

    /// Add bytes moved for a partition.
    pub fn add_transferred(&self, index: usize, bytes: u64) {
        if let Some(counter) = self.transferred.get(index) {
            counter.fetch_add(bytes, Ordering::SeqCst);
        }
    }

    /// Mark a partition as completed. Repeated calls are ignored.
    pub fn mark_completed(&self, index: usize) {
        if let Some(flag) = self.completed.get(index) {
            if !flag.swap(true, Ordering::SeqCst) {
                self.completed_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub fn total_transferred(&self) -> u64 {
        self.transferred.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    pub fn completed_partitions(&self) -> usize {
        self.completed_count.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let partitions = (0..self.num_partitions())
            .map(|index| PartitionProgress {
                index,
                expected: self.expected[index].load(Ordering::SeqCst),
                transferred: self.transferred[index].load(Ordering::SeqCst),
                completed: self.completed[index].load(Ordering::SeqCst),
            })
            .collect();
        ProgressSnapshot { partitions }
    }

    /// Signal that all transfers are done.
    pub fn signal_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Background reporter that polls counters and invokes the callback.
///
/// Dropping the reporter stops it after one final report.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
    counters: Arc<ProgressCounters>,
}

impl ProgressReporter {
    /// Start a new progress reporter.
    pub fn start(
        counters: Arc<ProgressCounters>,
        callback: TransferProgressCallback,
        poll_interval: Duration,
    ) -> Self {
        let counters_clone = Arc::clone(&counters);

        let handle = thread::Builder::new()
            .name("ccp-progress".to_string())
            .spawn(move || {
                while !counters_clone.is_done() {
                    callback(&counters_clone.snapshot());
                    thread::sleep(poll_interval);
                }
                callback(&counters_clone.snapshot());
            })
            .ok();

        Self { handle, counters }
    }

    /// Start a reporter with the default poll interval.
    pub fn start_default(counters: Arc<ProgressCounters>, callback: TransferProgressCallback) -> Self {
        Self::start(counters, callback, DEFAULT_POLL_INTERVAL)
    }

    /// Stop the reporter and wait for its final report.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.counters.signal_done();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
