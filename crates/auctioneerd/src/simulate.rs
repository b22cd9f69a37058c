//! `auctioneerd simulate` — run the auctioneer against an in-memory cluster.
//!
//! A scenario file describes the cells and the work to place:
//!
//! ```toml
//! [auctioneer]
//! max_retries = 2
//!
//! [[cells]]
//! id = "cell-a1"
//! zone = "z1"
//! memory_mb = 1024
//! disk_mb = 4096
//! containers = 32
//! stacks = { preloaded = ["cflinuxfs4"] }
//! arbitrary = ["docker"]
//!
//! [[lrps]]
//! process_guid = "web"
//! root_fs = "preloaded:cflinuxfs4"
//! memory_mb = 128
//! disk_mb = 256
//! instances = 3
//!
//! [[tasks]]
//! task_guid = "migrate"
//! root_fs = "docker:///org/migrate"
//! memory_mb = 256
//! disk_mb = 256
//! ```
//!
//! Every auction is driven to a final outcome (placed, or out of
//! attempts) and the outcome is reported as JSON.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use auction_core::{AuctioneerConfig, SystemClock, Tunables};
use auction_runner::{CountersSnapshot, Runner, SimulatedCell, SimulationDelegate};
use auction_state::{
    AuctionResults, CellState, DesiredLrp, LrpKey, LrpStartRequest, PlacementError, Resources,
    RootFsProvider, RootFsProviders, Task,
};

// ── Scenario file ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(flatten)]
    pub config: AuctioneerConfig,
    #[serde(default)]
    pub cells: Vec<CellSpec>,
    #[serde(default)]
    pub lrps: Vec<LrpSpec>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CellSpec {
    pub id: String,
    pub zone: String,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub containers: u64,
    /// Fixed stacks per scheme, e.g. `preloaded = ["cflinuxfs4"]`.
    #[serde(default)]
    pub stacks: BTreeMap<String, Vec<String>>,
    /// Schemes that accept any root filesystem.
    #[serde(default)]
    pub arbitrary: Vec<String>,
    #[serde(default)]
    pub evacuating: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LrpSpec {
    pub process_guid: String,
    pub root_fs: String,
    pub memory_mb: u64,
    pub disk_mb: u64,
    /// Starts indices `0..instances`.
    #[serde(default = "default_instances")]
    pub instances: u32,
}

fn default_instances() -> u32 {
    1
}

impl Scenario {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let scenario: Scenario = toml::from_str(content).context("failed to parse scenario")?;
        let mut ids = HashSet::new();
        for cell in &scenario.cells {
            anyhow::ensure!(ids.insert(cell.id.as_str()), "duplicate cell id: {}", cell.id);
        }
        Ok(scenario)
    }

    fn start_requests(&self) -> Vec<LrpStartRequest> {
        self.lrps
            .iter()
            .map(|spec| {
                let desired = DesiredLrp {
                    process_guid: spec.process_guid.clone(),
                    root_fs: spec.root_fs.clone(),
                    memory_mb: spec.memory_mb,
                    disk_mb: spec.disk_mb,
                };
                LrpStartRequest::new(desired, 0..spec.instances)
            })
            .collect()
    }
}

impl CellSpec {
    fn to_cell(&self) -> SimulatedCell {
        let mut providers = RootFsProviders::new();
        for (scheme, stacks) in &self.stacks {
            providers.insert(scheme.clone(), RootFsProvider::fixed(stacks.iter().cloned()));
        }
        for scheme in &self.arbitrary {
            providers.insert(scheme.clone(), RootFsProvider::Arbitrary);
        }

        let total = Resources::new(self.memory_mb, self.disk_mb, self.containers);
        let mut state = CellState::new(self.zone.clone(), providers, total);
        state.evacuating = self.evacuating;
        SimulatedCell::new(self.id.clone(), state)
    }
}

// ── Report ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub passes: usize,
    pub placed_lrps: Vec<PlacedLrp>,
    pub placed_tasks: Vec<PlacedTask>,
    pub failed_lrps: Vec<FailedLrp>,
    pub failed_tasks: Vec<FailedTask>,
    /// Auctions still in flight when the run stopped.
    pub unresolved: usize,
    pub cells: Vec<CellReport>,
    pub counters: CountersSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedLrp {
    pub process_guid: String,
    pub index: u32,
    pub cell: String,
    pub attempts: u32,
    pub wait_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedTask {
    pub task_guid: String,
    pub cell: String,
    pub attempts: u32,
    pub wait_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedLrp {
    pub process_guid: String,
    pub index: u32,
    pub attempts: u32,
    pub error: Option<PlacementError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedTask {
    pub task_guid: String,
    pub attempts: u32,
    pub error: Option<PlacementError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CellReport {
    pub id: String,
    pub zone: String,
    pub evacuating: bool,
    pub available: Resources,
    pub lrps: usize,
    pub tasks: usize,
}

impl Report {
    fn absorb(&mut self, results: AuctionResults) -> usize {
        let finished = results.successful_lrps.len()
            + results.successful_tasks.len()
            + results.failed_lrps.len()
            + results.failed_tasks.len();

        self.passes += 1;
        self.placed_lrps
            .extend(results.successful_lrps.into_iter().map(|a| PlacedLrp {
                process_guid: a.lrp.process_guid,
                index: a.lrp.index,
                cell: a.winner.unwrap_or_default(),
                attempts: a.attempts,
                wait_ms: a.wait_duration.as_millis() as u64,
            }));
        self.placed_tasks
            .extend(results.successful_tasks.into_iter().map(|a| PlacedTask {
                task_guid: a.task.task_guid,
                cell: a.winner.unwrap_or_default(),
                attempts: a.attempts,
                wait_ms: a.wait_duration.as_millis() as u64,
            }));
        self.failed_lrps
            .extend(results.failed_lrps.into_iter().map(|a| FailedLrp {
                process_guid: a.lrp.process_guid,
                index: a.lrp.index,
                attempts: a.attempts,
                error: a.placement_error,
            }));
        self.failed_tasks
            .extend(results.failed_tasks.into_iter().map(|a| FailedTask {
                task_guid: a.task.task_guid,
                attempts: a.attempts,
                error: a.placement_error,
            }));
        finished
    }
}

// ── Driver ────────────────────────────────────────────────────────

/// Run `scenario` until every auction is final or `timeout` elapses.
pub async fn run(scenario: &Scenario, tunables: &Tunables, timeout: Duration) -> anyhow::Result<Report> {
    let cells: Vec<Arc<SimulatedCell>> = scenario
        .cells
        .iter()
        .map(|spec| Arc::new(spec.to_cell()))
        .collect();
    let delegate = Arc::new(SimulationDelegate::new(cells));
    let runner = Arc::new(Runner::new(delegate.clone(), tunables, Arc::new(SystemClock)));

    let requests = scenario.start_requests();
    let expected = {
        let lrps: HashSet<LrpKey> = requests
            .iter()
            .flat_map(|r| r.indices.iter().map(|&index| r.desired.instance(index).key()))
            .collect();
        let tasks: HashSet<&str> = scenario.tasks.iter().map(|t| t.task_guid.as_str()).collect();
        lrps.len() + tasks.len()
    };

    info!(
        cells = scenario.cells.len(),
        auctions = expected,
        max_retries = tunables.max_retries,
        "starting simulation"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.run(shutdown_rx).await })
    };

    let batch = runner.batch();
    batch.add_lrps(requests)?;
    batch.add_tasks(scenario.tasks.clone())?;

    let mut report = Report::default();
    let mut finished = 0;
    let deadline = tokio::time::Instant::now() + timeout;

    while finished < expected {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        tokio::select! {
            next = delegate.next_result(remaining) => match next {
                Some(results) => finished += report.absorb(results),
                None => {
                    warn!(finished, expected, "simulation timed out");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    handle.await.context("runner task failed")?;

    report.unresolved = expected.saturating_sub(finished);
    report.counters = runner.counters().snapshot();
    report.cells = delegate
        .cells()
        .iter()
        .map(|cell| {
            let state = cell.snapshot();
            CellReport {
                id: cell.id().to_string(),
                zone: state.zone,
                evacuating: state.evacuating,
                available: state.available_resources,
                lrps: state.lrps.len(),
                tasks: state.tasks.len(),
            }
        })
        .collect();

    info!(
        placed = report.placed_lrps.len() + report.placed_tasks.len(),
        failed = report.failed_lrps.len() + report.failed_tasks.len(),
        unresolved = report.unresolved,
        passes = report.passes,
        "simulation finished"
    );
    Ok(report)
}
