//! Runner — the supervised scheduling loop.
//!
//! One task drives every pass:
//!
//! ```text
//! wait for batch readiness (or shutdown)
//!   └── fetch cell clients from the delegate   ── error → cool down, re-arm
//!       └── build zones (parallel state fetch)
//!           └── drain + dedupe the batch        ── empty → wait again
//!               └── schedule (place + commit)
//!                   └── retry (resubmit or finalize)
//!                       └── deliver results on a detached task
//! ```
//!
//! Shutdown is only observed between passes; a pass that has started
//! always finishes its commits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use auction_core::{Clock, Tunables};
use auction_placement::{Scheduler, WorkPool, Zone, ZoneBuilder};
use auction_state::AuctionResults;

use crate::batch::Batch;
use crate::delegate::AuctionDelegate;
use crate::error::{RunnerError, RunnerResult};
use crate::metrics::AuctionCounters;
use crate::retrier::Retrier;

pub struct Runner {
    delegate: Arc<dyn AuctionDelegate>,
    batch: Arc<Batch>,
    zone_builder: ZoneBuilder,
    scheduler: Scheduler,
    retrier: Retrier,
    counters: Arc<AuctionCounters>,
    fetch_cooldown: Duration,
}

impl Runner {
    pub fn new(delegate: Arc<dyn AuctionDelegate>, tunables: &Tunables, clock: Arc<dyn Clock>) -> Self {
        let pool = WorkPool::new(tunables.worker_pool_width);
        let batch = Arc::new(Batch::new(Arc::clone(&clock)));
        let counters = Arc::new(AuctionCounters::new());

        Self {
            delegate,
            zone_builder: ZoneBuilder::new(pool.clone(), tunables.state_fetch_retries),
            scheduler: Scheduler::new(pool, clock),
            retrier: Retrier::new(tunables.max_retries, Arc::clone(&batch), Arc::clone(&counters)),
            batch,
            counters,
            fetch_cooldown: tunables.fetch_cooldown,
        }
    }

    /// Handle producers use to submit work.
    pub fn batch(&self) -> Arc<Batch> {
        Arc::clone(&self.batch)
    }

    pub fn counters(&self) -> Arc<AuctionCounters> {
        Arc::clone(&self.counters)
    }

    /// Run passes until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// On return the batch is closed to new work.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            cooldown_ms = self.fetch_cooldown.as_millis() as u64,
            "auction runner started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = self.batch.wait_for_work() => {}
            }

            match self.run_pass().await {
                Ok(Some(results)) => self.deliver(results),
                Ok(None) => debug!("woke with an empty batch"),
                Err(e) => {
                    error!(
                        error = %e,
                        cooldown_ms = self.fetch_cooldown.as_millis() as u64,
                        "pass aborted, cooling down"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.fetch_cooldown) => {}
                        _ = shutdown.changed() => {}
                    }
                    // Queued work is still waiting.
                    self.batch.signal();
                }
            }
        }

        self.batch.close();
        info!(queued = self.batch.len(), "auction runner stopped");
    }

    /// Run one pass. Returns `Ok(None)` when the batch had nothing to schedule.
    pub async fn run_pass(&self) -> RunnerResult<Option<AuctionResults>> {
        let clients = self.delegate.fetch_cell_reps().await.map_err(|e| {
            self.counters.record_fetch_failure();
            RunnerError::FetchCellReps(e)
        })?;

        let requested = clients.len();
        let mut zones = self.zone_builder.build(clients).await;
        let included: usize = zones.values().map(Zone::len).sum();
        self.counters
            .record_cells_omitted(requested.saturating_sub(included));

        let (lrps, tasks) = self.batch.dedupe_and_drain();
        if lrps.is_empty() && tasks.is_empty() {
            return Ok(None);
        }

        self.counters.record_pass();
        let results = self.scheduler.schedule(&mut zones, lrps, tasks).await;
        Ok(Some(self.retrier.retry(results)))
    }

    fn deliver(&self, results: AuctionResults) {
        let delegate = Arc::clone(&self.delegate);
        tokio::spawn(async move {
            delegate.auction_completed(results).await;
        });
    }
}
