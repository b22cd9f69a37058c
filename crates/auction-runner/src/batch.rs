//! Batch — the intake queue between producers and the runner.
//!
//! Producers append auctions from any task; the runner drains everything
//! at the start of a pass. Readiness is a single coalescing flag: many
//! adds between two drains wake the runner once.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use auction_core::Clock;
use auction_state::{LrpAuction, LrpStartRequest, Task, TaskAuction};

use crate::error::{RunnerError, RunnerResult};

#[derive(Default)]
struct Pending {
    lrps: Vec<LrpAuction>,
    tasks: Vec<TaskAuction>,
}

pub struct Batch {
    pending: Mutex<Pending>,
    ready: AtomicBool,
    wakeup: Notify,
    closed: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl Batch {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            ready: AtomicBool::new(false),
            wakeup: Notify::new(),
            closed: AtomicBool::new(false),
            clock,
        }
    }

    /// Queue one LRP auction per requested index.
    ///
    /// Returns the number of auctions created.
    pub fn add_lrps(&self, requests: Vec<LrpStartRequest>) -> RunnerResult<usize> {
        self.ensure_open()?;
        let now = self.clock.now();
        let auctions: Vec<_> = requests
            .iter()
            .flat_map(|request| {
                request
                    .indices
                    .iter()
                    .map(|&index| LrpAuction::new(request.desired.instance(index), now))
            })
            .collect();
        let added = auctions.len();
        if added == 0 {
            return Ok(0);
        }

        self.pending.lock().lrps.extend(auctions);
        debug!(added, "lrp auctions queued");
        self.signal();
        Ok(added)
    }

    pub fn add_tasks(&self, tasks: Vec<Task>) -> RunnerResult<usize> {
        self.ensure_open()?;
        let now = self.clock.now();
        let added = tasks.len();
        if added == 0 {
            return Ok(0);
        }

        self.pending
            .lock()
            .tasks
            .extend(tasks.into_iter().map(|task| TaskAuction::new(task, now)));
        debug!(added, "task auctions queued");
        self.signal();
        Ok(added)
    }

    /// Re-queue auctions from an earlier pass, keeping their attempts and queue time.
    pub fn resubmit_lrps(&self, auctions: Vec<LrpAuction>) {
        if auctions.is_empty() {
            return;
        }
        self.pending.lock().lrps.extend(auctions);
        self.signal();
    }

    pub fn resubmit_tasks(&self, auctions: Vec<TaskAuction>) {
        if auctions.is_empty() {
            return;
        }
        self.pending.lock().tasks.extend(auctions);
        self.signal();
    }

    /// Take everything queued and clear readiness.
    ///
    /// Duplicates by identity collapse to the first occurrence; order is
    /// otherwise preserved.
    pub fn dedupe_and_drain(&self) -> (Vec<LrpAuction>, Vec<TaskAuction>) {
        let Pending { lrps, tasks } = {
            let mut pending = self.pending.lock();
            self.ready.store(false, Ordering::SeqCst);
            std::mem::take(&mut *pending)
        };

        let drained = lrps.len() + tasks.len();
        let mut seen = HashSet::new();
        let lrps: Vec<_> = lrps
            .into_iter()
            .filter(|auction| seen.insert(auction.key()))
            .collect();
        let mut seen = HashSet::new();
        let tasks: Vec<_> = tasks
            .into_iter()
            .filter(|auction| seen.insert(auction.task.task_guid.clone()))
            .collect();

        let kept = lrps.len() + tasks.len();
        if kept < drained {
            debug!(drained, kept, "collapsed duplicate auctions");
        }
        (lrps, tasks)
    }

    /// Raise readiness. Only the empty-to-ready transition wakes the runner.
    pub fn signal(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            self.wakeup.notify_one();
        }
    }

    /// Wait until readiness is raised, consuming it.
    pub async fn wait_for_work(&self) {
        loop {
            let notified = self.wakeup.notified();
            if self.ready.swap(false, Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// Refuse new work from producers. Resubmissions are still accepted.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queued auctions, duplicates included.
    pub fn len(&self) -> usize {
        let pending = self.pending.lock();
        pending.lrps.len() + pending.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> RunnerResult<()> {
        if self.is_closed() {
            return Err(RunnerError::BatchClosed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_core::ManualClock;
    use auction_state::DesiredLrp;
    use std::time::Duration;

    fn make_batch() -> (Batch, ManualClock) {
        let clock = ManualClock::default();
        (Batch::new(Arc::new(clock.clone())), clock)
    }

    fn desired(guid: &str) -> DesiredLrp {
        DesiredLrp {
            process_guid: guid.to_string(),
            root_fs: "preloaded:cflinuxfs4".to_string(),
            memory_mb: 10,
            disk_mb: 10,
        }
    }

    fn task(guid: &str) -> Task {
        Task {
            task_guid: guid.to_string(),
            root_fs: "preloaded:cflinuxfs4".to_string(),
            memory_mb: 10,
            disk_mb: 10,
        }
    }

    #[test]
    fn one_auction_per_index() {
        let (batch, clock) = make_batch();
        let added = batch
            .add_lrps(vec![LrpStartRequest::new(desired("pg-1"), [0, 1, 2])])
            .unwrap();
        assert_eq!(added, 3);

        let (lrps, tasks) = batch.dedupe_and_drain();
        assert!(tasks.is_empty());
        let indices: Vec<_> = lrps.iter().map(|a| a.lrp.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(lrps.iter().all(|a| a.attempts == 0 && a.queue_time == clock.now()));
    }

    #[test]
    fn duplicate_indices_in_a_request_collapse() {
        let (batch, _) = make_batch();
        let added = batch
            .add_lrps(vec![LrpStartRequest::new(desired("pg-1"), [4, 4, 4])])
            .unwrap();
        assert_eq!(added, 1);
    }

    #[test]
    fn drain_dedupes_by_identity() {
        let (batch, _) = make_batch();
        batch
            .add_lrps(vec![
                LrpStartRequest::new(desired("pg-1"), [1]),
                LrpStartRequest::new(desired("pg-1"), [1]),
                LrpStartRequest::new(desired("pg-2"), [2]),
            ])
            .unwrap();
        batch.add_tasks(vec![task("t-1"), task("t-2"), task("t-1")]).unwrap();

        let (lrps, tasks) = batch.dedupe_and_drain();
        let keys: Vec<_> = lrps
            .iter()
            .map(|a| (a.lrp.process_guid.as_str(), a.lrp.index))
            .collect();
        assert_eq!(keys, vec![("pg-1", 1), ("pg-2", 2)]);
        let guids: Vec<_> = tasks.iter().map(|a| a.key()).collect();
        assert_eq!(guids, vec!["t-1", "t-2"]);
    }

    #[test]
    fn dedupe_keeps_first_seen_record() {
        let (batch, _) = make_batch();
        let mut retried = LrpAuction::new(desired("pg-1").instance(0), batch.clock.now());
        retried.attempts = 2;
        batch.resubmit_lrps(vec![retried]);
        batch
            .add_lrps(vec![LrpStartRequest::new(desired("pg-1"), [0])])
            .unwrap();

        let (lrps, _) = batch.dedupe_and_drain();
        assert_eq!(lrps.len(), 1);
        assert_eq!(lrps[0].attempts, 2);
    }

    #[test]
    fn drain_empties_the_batch() {
        let (batch, _) = make_batch();
        batch.add_tasks(vec![task("t-1")]).unwrap();
        assert_eq!(batch.len(), 1);

        batch.dedupe_and_drain();

        assert!(batch.is_empty());
        let (lrps, tasks) = batch.dedupe_and_drain();
        assert!(lrps.is_empty() && tasks.is_empty());
    }

    #[test]
    fn resubmit_preserves_attempts_and_queue_time() {
        let (batch, clock) = make_batch();
        let queued_at = clock.now();
        let mut auction = TaskAuction::new(task("t-1"), queued_at);
        auction.attempts = 3;
        clock.advance(Duration::from_secs(30));

        batch.resubmit_tasks(vec![auction]);
        let (_, tasks) = batch.dedupe_and_drain();

        assert_eq!(tasks[0].attempts, 3);
        assert_eq!(tasks[0].queue_time, queued_at);
    }

    #[test]
    fn closed_batch_refuses_new_work() {
        let (batch, _) = make_batch();
        batch.close();
        assert!(matches!(batch.add_tasks(vec![task("t-1")]), Err(RunnerError::BatchClosed)));
        assert!(matches!(
            batch.add_lrps(vec![LrpStartRequest::new(desired("pg-1"), [0])]),
            Err(RunnerError::BatchClosed)
        ));
    }

    #[test]
    fn empty_adds_do_not_signal() {
        let (batch, _) = make_batch();
        assert_eq!(batch.add_tasks(Vec::new()).unwrap(), 0);
        assert!(!batch.ready.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn wait_returns_once_work_arrives() {
        let batch = Arc::new(make_batch().0);
        let waiter = {
            let batch = Arc::clone(&batch);
            tokio::spawn(async move { batch.wait_for_work().await })
        };

        tokio::task::yield_now().await;
        batch.add_tasks(vec![task("t-1")]).unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn many_adds_coalesce_into_one_wakeup() {
        let (batch, _) = make_batch();
        for i in 0..5 {
            batch.add_tasks(vec![task(&format!("t-{i}"))]).unwrap();
        }

        batch.wait_for_work().await;
        let second = tokio::time::timeout(Duration::from_millis(20), batch.wait_for_work()).await;
        assert!(second.is_err(), "readiness should have been consumed");
    }

    #[tokio::test]
    async fn drain_clears_readiness() {
        let (batch, _) = make_batch();
        batch.add_tasks(vec![task("t-1")]).unwrap();
        batch.dedupe_and_drain();

        let woke = tokio::time::timeout(Duration::from_millis(20), batch.wait_for_work()).await;
        assert!(woke.is_err());
    }
}
