//! Auction counters — lock-free tallies updated by the runner and retrier.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use auction_state::AuctionResults;

#[derive(Debug, Default)]
pub struct AuctionCounters {
    passes: AtomicU64,
    lrps_started: AtomicU64,
    tasks_started: AtomicU64,
    lrps_failed: AtomicU64,
    tasks_failed: AtomicU64,
    lrps_resubmitted: AtomicU64,
    tasks_resubmitted: AtomicU64,
    fetch_failures: AtomicU64,
    cells_omitted: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub passes: u64,
    pub lrps_started: u64,
    pub tasks_started: u64,
    pub lrps_failed: u64,
    pub tasks_failed: u64,
    pub lrps_resubmitted: u64,
    pub tasks_resubmitted: u64,
    pub fetch_failures: u64,
    pub cells_omitted: u64,
}

impl AuctionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count the outcome of a pass after retries were split off.
    pub fn record_final(&self, results: &AuctionResults) {
        self.lrps_started
            .fetch_add(results.successful_lrps.len() as u64, Ordering::Relaxed);
        self.tasks_started
            .fetch_add(results.successful_tasks.len() as u64, Ordering::Relaxed);
        self.lrps_failed
            .fetch_add(results.failed_lrps.len() as u64, Ordering::Relaxed);
        self.tasks_failed
            .fetch_add(results.failed_tasks.len() as u64, Ordering::Relaxed);
    }

    pub fn record_resubmitted(&self, lrps: usize, tasks: usize) {
        self.lrps_resubmitted.fetch_add(lrps as u64, Ordering::Relaxed);
        self.tasks_resubmitted.fetch_add(tasks as u64, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Cells the delegate returned that did not make it into the pass.
    pub fn record_cells_omitted(&self, omitted: usize) {
        self.cells_omitted.fetch_add(omitted as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            lrps_started: self.lrps_started.load(Ordering::Relaxed),
            tasks_started: self.tasks_started.load(Ordering::Relaxed),
            lrps_failed: self.lrps_failed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            lrps_resubmitted: self.lrps_resubmitted.load(Ordering::Relaxed),
            tasks_resubmitted: self.tasks_resubmitted.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            cells_omitted: self.cells_omitted.load(Ordering::Relaxed),
        }
    }
}
