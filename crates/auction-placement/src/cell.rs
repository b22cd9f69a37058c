//! Per-cell simulated ledger.
//!
//! A `Cell` wraps the snapshot fetched from a cell and mutates it in
//! place as the scheduler assigns work, so later placements in the same
//! pass see earlier ones. Accepted work accumulates in a pending buffer
//! that `commit` hands to the cell's client.
//!
//! Scores are lower-is-better:
//!
//! ```text
//! usage      = ((1 - mem_left/mem_total) + (1 - disk_left/disk_total)
//!               + (1 - containers_left/containers_total)) / 3
//! colocation = resident instances of the same process guid
//! score      = usage + colocation        (tasks: usage only)
//! ```
//!
//! where `*_left` is what remains after the candidate is subtracted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use auction_state::{CellClient, CellId, CellState, Lrp, Resources, Task, Work};

use crate::error::{ScoreError, ScoreResult};

/// Boxed commit future, detached from the cell that produced it.
pub type CommitFuture = Pin<Box<dyn Future<Output = Work> + Send>>;

pub struct Cell {
    id: CellId,
    client: Arc<dyn CellClient>,
    state: CellState,
    pending: Work,
}

impl Cell {
    pub fn new(id: impl Into<CellId>, client: Arc<dyn CellClient>, state: CellState) -> Self {
        Self {
            id: id.into(),
            client,
            state,
            pending: Work::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &CellState {
        &self.state
    }

    /// Work accepted during this pass and not yet committed.
    pub fn pending(&self) -> &Work {
        &self.pending
    }

    pub fn instance_count(&self, process_guid: &str) -> usize {
        self.state.instance_count(process_guid)
    }

    pub fn score_for_lrp(&self, lrp: &Lrp) -> ScoreResult<f64> {
        let remaining = self.remaining_after(&lrp.root_fs, lrp.resources())?;
        let colocation = self.state.instance_count(&lrp.process_guid) as f64;
        Ok(resource_usage_score(&remaining, &self.state.total_resources) + colocation)
    }

    pub fn score_for_task(&self, task: &Task) -> ScoreResult<f64> {
        let remaining = self.remaining_after(&task.root_fs, task.resources())?;
        Ok(resource_usage_score(&remaining, &self.state.total_resources))
    }

    /// Reserve the LRP on this cell and queue it for commit.
    pub fn start_lrp(&mut self, lrp: &Lrp) -> ScoreResult<()> {
        let remaining = self.remaining_after(&lrp.root_fs, lrp.resources())?;
        self.state.available_resources = remaining;
        self.state.lrps.push(lrp.clone());
        self.pending.lrps.push(lrp.clone());
        debug!(cell = %self.id, lrp = %lrp.key(), "lrp reserved");
        Ok(())
    }

    /// Reserve the task on this cell and queue it for commit.
    pub fn start_task(&mut self, task: &Task) -> ScoreResult<()> {
        let remaining = self.remaining_after(&task.root_fs, task.resources())?;
        self.state.available_resources = remaining;
        self.state.tasks.push(task.clone());
        self.pending.tasks.push(task.clone());
        debug!(cell = %self.id, task = %task.task_guid, "task reserved");
        Ok(())
    }

    /// Take the pending buffer and return a future that offers it to the cell.
    ///
    /// The future resolves to the residual: whatever the cell rejected, or
    /// the whole bundle when the client call fails. An empty buffer
    /// resolves immediately without contacting the client.
    pub fn commit(&mut self) -> CommitFuture {
        let work = std::mem::take(&mut self.pending);
        let client = Arc::clone(&self.client);
        let cell_id = self.id.clone();

        Box::pin(async move {
            if work.is_empty() {
                return Work::default();
            }

            let offered = work.len();
            match client.perform(work.clone()).await {
                Ok(residual) => {
                    if !residual.is_empty() {
                        warn!(
                            cell = %cell_id,
                            offered,
                            rejected = residual.len(),
                            "cell rejected part of the committed work"
                        );
                    }
                    residual
                }
                Err(e) => {
                    warn!(cell = %cell_id, offered, error = %e, "commit failed, treating all work as rejected");
                    work
                }
            }
        })
    }

    /// Resources left after placing `required`, if the cell is eligible.
    fn remaining_after(&self, root_fs: &str, required: Resources) -> ScoreResult<Resources> {
        if !self.state.root_fs_providers.matches(root_fs) {
            return Err(ScoreError::StackMismatch);
        }
        self.state
            .available_resources
            .checked_sub(&required)
            .ok_or(ScoreError::InsufficientResources)
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

/// Mean fraction of capacity in use across memory, disk, and containers.
///
/// Totals are validated as non-zero when the snapshot is ingested.
fn resource_usage_score(remaining: &Resources, total: &Resources) -> f64 {
    let used = |left: u64, total: u64| 1.0 - left as f64 / total as f64;
    (used(remaining.memory_mb, total.memory_mb)
        + used(remaining.disk_mb, total.disk_mb)
        + used(remaining.containers, total.containers))
        / 3.0
}
