//! In-process simulated cells and a recording delegate.
//!
//! `SimulatedCell` keeps its own `CellState` and applies work the way a
//! real cell would: a workload is accepted only if its root filesystem
//! is supported, it fits in what is left, and it is not already
//! resident. Faults can be injected for transport and rejection paths.
//! `reset` restores the state the cell was built with.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::debug;

use auction_state::{
    AuctionResults, CellClient, CellClientError, CellId, CellState, ClientResult, SimClient, Work,
};

use crate::delegate::AuctionDelegate;

pub struct SimulatedCell {
    id: CellId,
    initial: CellState,
    state: Mutex<CellState>,
    state_failures: AtomicU32,
    fail_perform: AtomicBool,
    reject_lrps: AtomicBool,
    evacuate_after_fetch: AtomicBool,
    perform_calls: AtomicUsize,
}

impl SimulatedCell {
    pub fn new(id: impl Into<CellId>, state: CellState) -> Self {
        Self {
            id: id.into(),
            initial: state.clone(),
            state: Mutex::new(state),
            state_failures: AtomicU32::new(0),
            fail_perform: AtomicBool::new(false),
            reject_lrps: AtomicBool::new(false),
            evacuate_after_fetch: AtomicBool::new(false),
            perform_calls: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state, without going through the client interface.
    pub fn snapshot(&self) -> CellState {
        self.state.lock().clone()
    }

    pub fn set_evacuating(&self, evacuating: bool) {
        self.state.lock().evacuating = evacuating;
    }

    /// Start evacuating right after the next successful `state` call.
    /// That snapshot still reports the cell as available.
    pub fn evacuate_after_next_fetch(&self) {
        self.evacuate_after_fetch.store(true, Ordering::SeqCst);
    }

    /// Fail the next `n` calls to `state`.
    pub fn fail_state_times(&self, n: u32) {
        self.state_failures.store(n, Ordering::SeqCst);
    }

    /// Make every `perform` call fail at the transport level.
    pub fn fail_perform(&self, fail: bool) {
        self.fail_perform.store(fail, Ordering::SeqCst);
    }

    /// Hand every offered LRP back as residual.
    pub fn reject_lrps(&self, reject: bool) {
        self.reject_lrps.store(reject, Ordering::SeqCst);
    }

    pub fn perform_calls(&self) -> usize {
        self.perform_calls.load(Ordering::SeqCst)
    }

    fn apply(&self, work: Work) -> Work {
        let reject_lrps = self.reject_lrps.load(Ordering::SeqCst);
        let mut state = self.state.lock();
        let mut residual = Work::default();

        for key in work.stops {
            if let Some(pos) = state.lrps.iter().position(|lrp| lrp.key() == key) {
                let stopped = state.lrps.remove(pos);
                state.available_resources += stopped.resources();
            }
        }

        for lrp in work.lrps {
            let duplicate = state.lrps.iter().any(|resident| resident.key() == lrp.key());
            let remaining = state
                .available_resources
                .checked_sub(&lrp.resources())
                .filter(|_| state.root_fs_providers.matches(&lrp.root_fs));
            match remaining {
                Some(remaining) if !reject_lrps && !duplicate => {
                    state.available_resources = remaining;
                    state.lrps.push(lrp);
                }
                _ => residual.lrps.push(lrp),
            }
        }

        for task in work.tasks {
            let duplicate = state.tasks.iter().any(|t| t.task_guid == task.task_guid);
            let remaining = state
                .available_resources
                .checked_sub(&task.resources())
                .filter(|_| state.root_fs_providers.matches(&task.root_fs));
            match remaining {
                Some(remaining) if !duplicate => {
                    state.available_resources = remaining;
                    state.tasks.push(task);
                }
                _ => residual.tasks.push(task),
            }
        }

        residual
    }
}

#[async_trait]
impl CellClient for SimulatedCell {
    async fn state(&self) -> ClientResult<CellState> {
        let failing = self
            .state_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CellClientError::Unreachable(self.id.clone()));
        }
        let snapshot = self.snapshot();
        if self.evacuate_after_fetch.swap(false, Ordering::SeqCst) {
            self.set_evacuating(true);
        }
        Ok(snapshot)
    }

    async fn perform(&self, work: Work) -> ClientResult<Work> {
        self.perform_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_perform.load(Ordering::SeqCst) {
            return Err(CellClientError::Timeout);
        }
        let offered = work.len();
        let residual = self.apply(work);
        debug!(cell = %self.id, offered, rejected = residual.len(), "simulated cell performed work");
        Ok(residual)
    }
}

#[async_trait]
impl SimClient for SimulatedCell {
    async fn reset(&self) -> ClientResult<()> {
        *self.state.lock() = self.initial.clone();
        self.state_failures.store(0, Ordering::SeqCst);
        self.fail_perform.store(false, Ordering::SeqCst);
        self.reject_lrps.store(false, Ordering::SeqCst);
        self.evacuate_after_fetch.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Delegate over a fixed set of simulated cells that records every result.
pub struct SimulationDelegate {
    cells: Vec<Arc<SimulatedCell>>,
    fetch_failures: AtomicU32,
    fetch_calls: AtomicUsize,
    completed: Mutex<Vec<AuctionResults>>,
    results_tx: mpsc::UnboundedSender<AuctionResults>,
    results_rx: AsyncMutex<mpsc::UnboundedReceiver<AuctionResults>>,
}

impl SimulationDelegate {
    pub fn new(cells: Vec<Arc<SimulatedCell>>) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            cells,
            fetch_failures: AtomicU32::new(0),
            fetch_calls: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
            results_tx,
            results_rx: AsyncMutex::new(results_rx),
        }
    }

    pub fn cells(&self) -> &[Arc<SimulatedCell>] {
        &self.cells
    }

    pub fn cell(&self, id: &str) -> Option<&Arc<SimulatedCell>> {
        self.cells.iter().find(|cell| cell.id() == id)
    }

    /// Fail the next `n` calls to `fetch_cell_reps`.
    pub fn fail_fetches(&self, n: u32) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Every result delivered so far, in delivery order.
    pub fn completed(&self) -> Vec<AuctionResults> {
        self.completed.lock().clone()
    }

    /// Wait for the next delivered result not yet observed through this call.
    pub async fn next_result(&self, timeout: Duration) -> Option<AuctionResults> {
        let mut rx = self.results_rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Restore every cell to its initial state and forget recorded results.
    pub async fn reset(&self) -> ClientResult<()> {
        for cell in &self.cells {
            cell.reset().await?;
        }
        self.completed.lock().clear();
        let mut rx = self.results_rx.lock().await;
        while rx.try_recv().is_ok() {}
        Ok(())
    }
}

#[async_trait]
impl AuctionDelegate for SimulationDelegate {
    async fn fetch_cell_reps(&self) -> anyhow::Result<HashMap<CellId, Arc<dyn CellClient>>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fetch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("cell registry unavailable");
        }

        Ok(self
            .cells
            .iter()
            .map(|cell| {
                let client: Arc<dyn CellClient> = cell.clone();
                (cell.id().to_string(), client)
            })
            .collect())
    }

    async fn auction_completed(&self, results: AuctionResults) {
        self.completed.lock().push(results.clone());
        // The receiver lives as long as self.
        let _ = self.results_tx.send(results);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_state::{Lrp, LrpKey, Resources, RootFsProvider, RootFsProviders, Task};

    fn make_cell(memory: u64, containers: u64) -> SimulatedCell {
        let providers =
            RootFsProviders::new().with("preloaded", RootFsProvider::fixed(["cflinuxfs4"]));
        let state = CellState::new("z1", providers, Resources::new(memory, memory, containers));
        SimulatedCell::new("sim-1", state)
    }

    fn make_lrp(guid: &str, index: u32, memory: u64) -> Lrp {
        Lrp {
            process_guid: guid.to_string(),
            index,
            root_fs: "preloaded:cflinuxfs4".to_string(),
            memory_mb: memory,
            disk_mb: memory,
        }
    }

    fn make_task(guid: &str, memory: u64) -> Task {
        Task {
            task_guid: guid.to_string(),
            root_fs: "preloaded:cflinuxfs4".to_string(),
            memory_mb: memory,
            disk_mb: memory,
        }
    }

    #[tokio::test]
    async fn accepts_what_fits_and_returns_the_rest() {
        let cell = make_cell(100, 10);
        let work = Work {
            lrps: vec![make_lrp("pg-1", 0, 60), make_lrp("pg-2", 0, 60)],
            tasks: vec![make_task("t-1", 30)],
            stops: vec![],
        };

        let residual = cell.perform(work).await.unwrap();

        assert_eq!(residual.lrps.len(), 1);
        assert_eq!(residual.lrps[0].process_guid, "pg-2");
        assert!(residual.tasks.is_empty());
        let state = cell.snapshot();
        assert_eq!(state.available_resources, Resources::new(10, 10, 8));
    }

    #[tokio::test]
    async fn rejects_unsupported_stack_and_duplicates() {
        let cell = make_cell(100, 10);
        let mut foreign = make_lrp("pg-1", 0, 1);
        foreign.root_fs = "docker:///nginx".to_string();
        cell.perform(Work {
            lrps: vec![make_lrp("pg-2", 0, 1)],
            ..Default::default()
        })
        .await
        .unwrap();

        let residual = cell
            .perform(Work {
                lrps: vec![foreign, make_lrp("pg-2", 0, 1)],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(residual.lrps.len(), 2);
    }

    #[tokio::test]
    async fn stops_release_resources() {
        let cell = make_cell(100, 10);
        cell.perform(Work {
            lrps: vec![make_lrp("pg-1", 0, 40)],
            ..Default::default()
        })
        .await
        .unwrap();

        cell.perform(Work {
            stops: vec![LrpKey {
                process_guid: "pg-1".to_string(),
                index: 0,
            }],
            ..Default::default()
        })
        .await
        .unwrap();

        let state = cell.snapshot();
        assert!(state.lrps.is_empty());
        assert_eq!(state.available_resources, state.total_resources);
    }

    #[tokio::test]
    async fn injected_faults_and_reset() {
        let cell = make_cell(100, 10);
        cell.fail_state_times(1);
        cell.fail_perform(true);

        assert!(cell.state().await.is_err());
        assert!(cell.state().await.is_ok());
        assert_eq!(
            cell.perform(Work::default()).await,
            Err(CellClientError::Timeout)
        );

        cell.fail_perform(false);
        cell.perform(Work {
            tasks: vec![make_task("t-1", 10)],
            ..Default::default()
        })
        .await
        .unwrap();
        cell.fail_state_times(5);
        cell.reset().await.unwrap();

        assert!(cell.state().await.is_ok());
        assert!(cell.snapshot().tasks.is_empty());
    }

    #[tokio::test]
    async fn evacuation_after_fetch_still_accepts_work() {
        let cell = make_cell(100, 10);
        cell.evacuate_after_next_fetch();

        assert!(!cell.state().await.unwrap().evacuating);
        assert!(cell.snapshot().evacuating);
        let residual = cell
            .perform(Work {
                lrps: vec![make_lrp("pg-1", 0, 10)],
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(residual.is_empty());
        assert_eq!(cell.snapshot().lrps.len(), 1);
        assert!(cell.state().await.unwrap().evacuating);
    }

    #[tokio::test]
    async fn reject_lrps_leaves_tasks_alone() {
        let cell = make_cell(100, 10);
        cell.reject_lrps(true);

        let residual = cell
            .perform(Work {
                lrps: vec![make_lrp("pg-1", 0, 10)],
                tasks: vec![make_task("t-1", 10)],
                stops: vec![],
            })
            .await
            .unwrap();

        assert_eq!(residual.lrps.len(), 1);
        assert!(residual.tasks.is_empty());
    }

    #[tokio::test]
    async fn delegate_records_and_replays_results() {
        let delegate = SimulationDelegate::new(vec![Arc::new(make_cell(100, 10))]);
        let reps = delegate.fetch_cell_reps().await.unwrap();
        assert!(reps.contains_key("sim-1"));

        delegate.auction_completed(AuctionResults::default()).await;

        assert!(delegate.next_result(Duration::from_secs(1)).await.is_some());
        assert!(delegate.next_result(Duration::from_millis(10)).await.is_none());
        assert_eq!(delegate.completed().len(), 1);
    }

    #[tokio::test]
    async fn delegate_reset_restores_cells_and_forgets_results() {
        let cell = Arc::new(make_cell(100, 10));
        let delegate = SimulationDelegate::new(vec![Arc::clone(&cell)]);
        cell.perform(Work {
            lrps: vec![make_lrp("pg-1", 0, 10)],
            ..Default::default()
        })
        .await
        .unwrap();
        delegate.auction_completed(AuctionResults::default()).await;

        delegate.reset().await.unwrap();

        assert!(cell.snapshot().lrps.is_empty());
        assert!(delegate.completed().is_empty());
        assert!(delegate.next_result(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn delegate_fetch_failures_are_transient() {
        let delegate = SimulationDelegate::new(vec![Arc::new(make_cell(100, 10))]);
        delegate.fail_fetches(1);

        assert!(delegate.fetch_cell_reps().await.is_err());
        assert!(delegate.fetch_cell_reps().await.is_ok());
        assert_eq!(delegate.fetch_calls(), 2);
    }
}
