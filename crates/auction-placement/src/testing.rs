//! Test doubles shared by the placement tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use auction_state::*;

pub const STACK: &str = "preloaded:cflinuxfs4";

pub fn providers() -> RootFsProviders {
    RootFsProviders::new()
        .with("preloaded", RootFsProvider::fixed(["cflinuxfs4"]))
        .with("docker", RootFsProvider::Arbitrary)
}

pub fn lrp(process_guid: &str, index: u32, memory_mb: u64) -> Lrp {
    Lrp {
        process_guid: process_guid.to_string(),
        index,
        root_fs: STACK.to_string(),
        memory_mb,
        disk_mb: memory_mb,
    }
}

pub fn task(task_guid: &str, memory_mb: u64) -> Task {
    Task {
        task_guid: task_guid.to_string(),
        root_fs: STACK.to_string(),
        memory_mb,
        disk_mb: memory_mb,
    }
}

/// A cell state with `count` resident instances per `(guid, count, memory)` entry.
pub fn state_with(zone: &str, total: Resources, residents: &[(&str, u32, u64)]) -> CellState {
    let mut state = CellState::new(zone, providers(), total);
    for &(guid, count, memory) in residents {
        for index in 0..count {
            state.lrps.push(lrp(guid, index, memory));
        }
    }
    state.available_resources = total.saturating_sub(&state.used_resources());
    state
}

/// Scriptable `CellClient`.
#[derive(Default)]
pub struct FakeClient {
    state: Mutex<Option<CellState>>,
    state_failures: AtomicUsize,
    state_calls: AtomicUsize,
    perform_error: Mutex<Option<CellClientError>>,
    reject_lrps: Mutex<bool>,
    panic_on_perform: Mutex<bool>,
    perform_calls: AtomicUsize,
    performed: Mutex<Vec<Work>>,
}

impl FakeClient {
    pub fn with_state(state: CellState) -> Self {
        let client = Self::default();
        *client.state.lock() = Some(state);
        client
    }

    /// Fail the next `n` state fetches.
    pub fn fail_state_times(&self, n: usize) {
        self.state_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_perform(&self, err: CellClientError) {
        *self.perform_error.lock() = Some(err);
    }

    pub fn reject_lrps(&self, reject: bool) {
        *self.reject_lrps.lock() = reject;
    }

    pub fn panic_on_perform(&self, panic: bool) {
        *self.panic_on_perform.lock() = panic;
    }

    pub fn state_calls(&self) -> usize {
        self.state_calls.load(Ordering::SeqCst)
    }

    pub fn perform_calls(&self) -> usize {
        self.perform_calls.load(Ordering::SeqCst)
    }

    pub fn performed(&self) -> Vec<Work> {
        self.performed.lock().clone()
    }
}

#[async_trait]
impl CellClient for FakeClient {
    async fn state(&self) -> ClientResult<CellState> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .state_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CellClientError::Unreachable("injected".to_string()));
        }
        self.state
            .lock()
            .clone()
            .ok_or_else(|| CellClientError::InvalidResponse("no state".to_string()))
    }

    async fn perform(&self, work: Work) -> ClientResult<Work> {
        self.perform_calls.fetch_add(1, Ordering::SeqCst);
        if *self.panic_on_perform.lock() {
            panic!("perform blew up");
        }
        if let Some(err) = self.perform_error.lock().clone() {
            return Err(err);
        }
        self.performed.lock().push(work.clone());
        let mut residual = Work::default();
        if *self.reject_lrps.lock() {
            residual.lrps = work.lrps;
        }
        Ok(residual)
    }
}
