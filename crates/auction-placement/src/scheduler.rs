//! Scheduling pass — assigns every auction to a cell and commits.
//!
//! A pass runs in this order:
//! 1. Sort LRPs by index ascending, then memory descending, so every
//!    workload gets its first replica before any gets a second, and big
//!    workloads land before small ones fill the gaps.
//! 2. Place each LRP, preferring zones that host the fewest replicas of
//!    its process guid.
//! 3. Place each task (memory descending) on the lowest-scoring cell.
//! 4. Commit every cell's pending work through the worker pool.
//! 5. Move anything a cell rejected back into the failed lists.
//! 6. Bump attempts on every auction; stamp wait time on successes.
//!
//! Cells are mutated only here, on the caller's task.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use auction_core::Clock;
use auction_state::{
    AuctionResults, CellId, Lrp, LrpAuction, LrpKey, PlacementError, Task, TaskAuction, Work,
    ZoneId,
};

use crate::error::ScoreError;
use crate::pool::WorkPool;
use crate::zone::Zones;

pub struct Scheduler {
    pool: WorkPool,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(pool: WorkPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Run one pass over `zones`. Cells in `zones` are left holding the
    /// simulated post-placement state.
    pub async fn schedule(
        &self,
        zones: &mut Zones,
        mut lrp_auctions: Vec<LrpAuction>,
        mut task_auctions: Vec<TaskAuction>,
    ) -> AuctionResults {
        let started = Instant::now();

        if zones.is_empty() {
            info!(
                lrps = lrp_auctions.len(),
                tasks = task_auctions.len(),
                "no cells available, failing every auction"
            );
            return self.fail_all(lrp_auctions, task_auctions);
        }

        sort_lrp_auctions(&mut lrp_auctions);
        sort_task_auctions(&mut task_auctions);

        let mut results = AuctionResults::default();

        for mut auction in lrp_auctions {
            match place_lrp(zones, &auction.lrp) {
                Ok(cell_id) => {
                    auction.winner = Some(cell_id);
                    auction.placement_error = None;
                    results.successful_lrps.push(auction);
                }
                Err(e) => {
                    debug!(lrp = %auction.lrp.key(), error = %e, "lrp not placed");
                    auction.winner = None;
                    auction.placement_error = Some(e);
                    results.failed_lrps.push(auction);
                }
            }
        }

        for mut auction in task_auctions {
            match place_task(zones, &auction.task) {
                Ok(cell_id) => {
                    auction.winner = Some(cell_id);
                    auction.placement_error = None;
                    results.successful_tasks.push(auction);
                }
                Err(e) => {
                    debug!(task = %auction.task.task_guid, error = %e, "task not placed");
                    auction.winner = None;
                    auction.placement_error = Some(e);
                    results.failed_tasks.push(auction);
                }
            }
        }

        let (mut offered, commits): (Vec<_>, Vec<_>) = zones
            .values_mut()
            .flat_map(|zone| zone.cells_mut().iter_mut())
            .map(|cell| ((cell.id().to_string(), cell.pending().clone()), cell.commit()))
            .unzip();
        let mut residual = Work::default();
        for (position, rejected) in self.pool.run_indexed(commits).await {
            match rejected {
                Some(rejected) => residual.extend(rejected),
                None => {
                    let (cell_id, work) = std::mem::take(&mut offered[position]);
                    warn!(
                        cell = %cell_id,
                        offered = work.len(),
                        "commit did not finish, treating all work as rejected"
                    );
                    residual.extend(work);
                }
            }
        }

        reconcile(&mut results, residual);
        self.mark(&mut results);

        info!(
            successful_lrps = results.successful_lrps.len(),
            successful_tasks = results.successful_tasks.len(),
            failed_lrps = results.failed_lrps.len(),
            failed_tasks = results.failed_tasks.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "scheduling pass complete"
        );
        results
    }

    fn fail_all(
        &self,
        lrp_auctions: Vec<LrpAuction>,
        task_auctions: Vec<TaskAuction>,
    ) -> AuctionResults {
        let mut results = AuctionResults {
            failed_lrps: lrp_auctions,
            failed_tasks: task_auctions,
            ..Default::default()
        };
        for auction in &mut results.failed_lrps {
            auction.winner = None;
            auction.placement_error = Some(PlacementError::CellMismatch);
        }
        for auction in &mut results.failed_tasks {
            auction.winner = None;
            auction.placement_error = Some(PlacementError::CellMismatch);
        }
        self.mark(&mut results);
        results
    }

    fn mark(&self, results: &mut AuctionResults) {
        for auction in &mut results.successful_lrps {
            auction.attempts += 1;
            auction.wait_duration = self.clock.since(auction.queue_time);
        }
        for auction in &mut results.successful_tasks {
            auction.attempts += 1;
            auction.wait_duration = self.clock.since(auction.queue_time);
        }
        for auction in &mut results.failed_lrps {
            auction.attempts += 1;
        }
        for auction in &mut results.failed_tasks {
            auction.attempts += 1;
        }
    }
}

/// Index ascending, then memory descending. Stable for equal keys.
pub fn sort_lrp_auctions(auctions: &mut [LrpAuction]) {
    auctions.sort_by(|a, b| {
        a.lrp
            .index
            .cmp(&b.lrp.index)
            .then_with(|| b.lrp.memory_mb.cmp(&a.lrp.memory_mb))
    });
}

/// Memory descending. Stable for equal keys.
pub fn sort_task_auctions(auctions: &mut [TaskAuction]) {
    auctions.sort_by(|a, b| b.task.memory_mb.cmp(&a.task.memory_mb));
}

/// Best cell seen so far: `(zone, position in zone, score)`.
type Candidate = (ZoneId, usize, f64);

fn consider(best: &mut Option<Candidate>, zone: &ZoneId, position: usize, score: f64) {
    if best.as_ref().is_none_or(|(_, _, current)| score < *current) {
        *best = Some((zone.clone(), position, score));
    }
}

fn place_lrp(zones: &mut Zones, lrp: &Lrp) -> Result<CellId, PlacementError> {
    let mut ranked: Vec<(usize, ZoneId)> = zones
        .iter()
        .map(|(id, zone)| (zone.instance_count(&lrp.process_guid), id.clone()))
        .collect();
    ranked.sort_by_key(|(count, _)| *count);

    let mut best: Option<Candidate> = None;
    let mut saw_mismatch = false;

    for (rank, (count, zone_id)) in ranked.iter().enumerate() {
        let Some(zone) = zones.get(zone_id) else { continue };
        for (position, cell) in zone.cells().iter().enumerate() {
            match cell.score_for_lrp(lrp) {
                Ok(score) => consider(&mut best, zone_id, position, score),
                Err(ScoreError::StackMismatch) => saw_mismatch = true,
                Err(ScoreError::InsufficientResources) => {}
            }
        }

        // Zones tied on replica count are all examined; stop at the
        // first strictly worse zone once something fits.
        let next_is_worse = ranked
            .get(rank + 1)
            .is_some_and(|(next_count, _)| next_count > count);
        if next_is_worse && best.is_some() {
            break;
        }
    }

    let (zone_id, position) = match best {
        Some((zone_id, position, _)) => (zone_id, position),
        None if saw_mismatch => return Err(PlacementError::CellMismatch),
        None => return Err(PlacementError::InsufficientResources),
    };

    let cell = zones
        .get_mut(&zone_id)
        .and_then(|zone| zone.cells_mut().get_mut(position))
        .ok_or(PlacementError::InsufficientResources)?;
    cell.start_lrp(lrp)?;
    Ok(cell.id().to_string())
}

fn place_task(zones: &mut Zones, task: &Task) -> Result<CellId, PlacementError> {
    let mut best: Option<Candidate> = None;
    let mut saw_mismatch = false;

    for (zone_id, zone) in zones.iter() {
        for (position, cell) in zone.cells().iter().enumerate() {
            match cell.score_for_task(task) {
                Ok(score) => consider(&mut best, zone_id, position, score),
                Err(ScoreError::StackMismatch) => saw_mismatch = true,
                Err(ScoreError::InsufficientResources) => {}
            }
        }
    }

    let (zone_id, position) = match best {
        Some((zone_id, position, _)) => (zone_id, position),
        None if saw_mismatch => return Err(PlacementError::CellMismatch),
        None => return Err(PlacementError::InsufficientResources),
    };

    let cell = zones
        .get_mut(&zone_id)
        .and_then(|zone| zone.cells_mut().get_mut(position))
        .ok_or(PlacementError::InsufficientResources)?;
    cell.start_task(task)?;
    Ok(cell.id().to_string())
}

/// Move every workload a cell rejected at commit from success to failure.
fn reconcile(results: &mut AuctionResults, residual: Work) {
    if residual.lrps.is_empty() && residual.tasks.is_empty() {
        return;
    }

    let rejected_lrps: HashSet<LrpKey> = residual.lrps.iter().map(Lrp::key).collect();
    let rejected_tasks: HashSet<&str> = residual.tasks.iter().map(|t| t.task_guid.as_str()).collect();

    // Each workload is offered to exactly one cell per pass.
    debug_assert_eq!(rejected_lrps.len(), residual.lrps.len());
    debug_assert_eq!(rejected_tasks.len(), residual.tasks.len());

    let (rejected, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut results.successful_lrps)
        .into_iter()
        .partition(|auction| rejected_lrps.contains(&auction.key()));
    if rejected.len() != rejected_lrps.len() {
        error!(
            residual = rejected_lrps.len(),
            matched = rejected.len(),
            "cell returned lrps it was never offered"
        );
    }
    results.successful_lrps = kept;
    results
        .failed_lrps
        .extend(rejected.into_iter().map(|mut auction| {
            auction.winner = None;
            auction
        }));

    let (rejected, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut results.successful_tasks)
        .into_iter()
        .partition(|auction| rejected_tasks.contains(auction.key()));
    if rejected.len() != rejected_tasks.len() {
        error!(
            residual = rejected_tasks.len(),
            matched = rejected.len(),
            "cell returned tasks it was never offered"
        );
    }
    results.successful_tasks = kept;
    results
        .failed_tasks
        .extend(rejected.into_iter().map(|mut auction| {
            auction.winner = None;
            auction
        }));
}
