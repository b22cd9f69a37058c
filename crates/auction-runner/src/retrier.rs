//! Retrier — routes failed auctions back into the batch until they run out of attempts.

use std::sync::Arc;

use tracing::{debug, warn};

use auction_state::AuctionResults;

use crate::batch::Batch;
use crate::metrics::AuctionCounters;

pub struct Retrier {
    max_retries: u32,
    batch: Arc<Batch>,
    counters: Arc<AuctionCounters>,
}

impl Retrier {
    pub fn new(max_retries: u32, batch: Arc<Batch>, counters: Arc<AuctionCounters>) -> Self {
        Self {
            max_retries,
            batch,
            counters,
        }
    }

    /// Resubmit every failure with `attempts <= max_retries` and return
    /// what is final: all successes plus the failures that are out of
    /// attempts.
    ///
    /// `attempts` already includes the pass that just ran, so a workload
    /// runs at most `max_retries + 1` times.
    pub fn retry(&self, mut results: AuctionResults) -> AuctionResults {
        let max = self.max_retries;

        let (retry_lrps, final_lrps): (Vec<_>, Vec<_>) = std::mem::take(&mut results.failed_lrps)
            .into_iter()
            .partition(|auction| auction.attempts <= max);
        let (retry_tasks, final_tasks): (Vec<_>, Vec<_>) =
            std::mem::take(&mut results.failed_tasks)
                .into_iter()
                .partition(|auction| auction.attempts <= max);

        for auction in &final_lrps {
            warn!(
                lrp = %auction.key(),
                attempts = auction.attempts,
                error = ?auction.placement_error,
                "lrp auction failed permanently"
            );
        }
        for auction in &final_tasks {
            warn!(
                task = %auction.key(),
                attempts = auction.attempts,
                error = ?auction.placement_error,
                "task auction failed permanently"
            );
        }

        if !retry_lrps.is_empty() || !retry_tasks.is_empty() {
            debug!(
                lrps = retry_lrps.len(),
                tasks = retry_tasks.len(),
                "resubmitting failed auctions"
            );
            self.counters
                .record_resubmitted(retry_lrps.len(), retry_tasks.len());
            self.batch.resubmit_lrps(retry_lrps);
            self.batch.resubmit_tasks(retry_tasks);
        }

        results.failed_lrps = final_lrps;
        results.failed_tasks = final_tasks;
        self.counters.record_final(&results);
        results
    }
}
