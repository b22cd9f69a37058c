//! Domain types for the auctioneer.
//!
//! These types describe cell capacity snapshots, the workloads being
//! placed, and the auction records that carry a workload through a
//! scheduling pass. All types are serializable so producers and the
//! simulation file format can describe them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{StateError, StateResult};

/// Opaque identifier of a cell.
pub type CellId = String;

/// Failure-domain label attached to a cell.
pub type ZoneId = String;

// ── Resources ─────────────────────────────────────────────────────

/// `(memory, disk, containers)` triple ordered componentwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resources {
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub containers: u64,
}

impl Resources {
    pub fn new(memory_mb: u64, disk_mb: u64, containers: u64) -> Self {
        Self {
            memory_mb,
            disk_mb,
            containers,
        }
    }

    /// True when every component of `self` is <= the matching one in `other`.
    pub fn fits_in(&self, other: &Resources) -> bool {
        self.memory_mb <= other.memory_mb
            && self.disk_mb <= other.disk_mb
            && self.containers <= other.containers
    }

    /// Componentwise subtraction, `None` if any component would go negative.
    pub fn checked_sub(&self, other: &Resources) -> Option<Resources> {
        Some(Resources {
            memory_mb: self.memory_mb.checked_sub(other.memory_mb)?,
            disk_mb: self.disk_mb.checked_sub(other.disk_mb)?,
            containers: self.containers.checked_sub(other.containers)?,
        })
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            disk_mb: self.disk_mb.saturating_sub(other.disk_mb),
            containers: self.containers.saturating_sub(other.containers),
        }
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, rhs: Resources) -> Resources {
        Resources {
            memory_mb: self.memory_mb + rhs.memory_mb,
            disk_mb: self.disk_mb + rhs.disk_mb,
            containers: self.containers + rhs.containers,
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Resources) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for Resources {
    fn sum<I: Iterator<Item = Resources>>(iter: I) -> Resources {
        iter.fold(Resources::default(), Add::add)
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}MB mem / {}MB disk / {} containers",
            self.memory_mb, self.disk_mb, self.containers
        )
    }
}

// ── Root filesystem providers ─────────────────────────────────────

/// One capability a cell advertises for a root-filesystem scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RootFsProvider {
    /// Matches only the listed stack identifiers.
    FixedSet { stacks: BTreeSet<String> },
    /// Matches any root filesystem under the scheme.
    Arbitrary,
}

impl RootFsProvider {
    pub fn fixed<I, S>(stacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RootFsProvider::FixedSet {
            stacks: stacks.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, url: &Url) -> bool {
        match self {
            RootFsProvider::Arbitrary => true,
            RootFsProvider::FixedSet { stacks } => stacks.contains(url.path()),
        }
    }
}

/// Providers advertised by a cell, keyed by URL scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootFsProviders(BTreeMap<String, RootFsProvider>);

impl RootFsProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, scheme: impl Into<String>, provider: RootFsProvider) -> Self {
        self.insert(scheme, provider);
        self
    }

    pub fn insert(&mut self, scheme: impl Into<String>, provider: RootFsProvider) {
        self.0.insert(scheme.into(), provider);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any provider can run the given root filesystem URL.
    ///
    /// `preloaded:cflinuxfs4` matches a fixed set containing `cflinuxfs4`
    /// under the `preloaded` scheme; `docker:///library/redis` matches an
    /// arbitrary provider under `docker`. Unparseable URLs match nothing.
    pub fn matches(&self, root_fs: &str) -> bool {
        let Ok(url) = Url::parse(root_fs) else {
            return false;
        };
        self.0
            .get(url.scheme())
            .is_some_and(|provider| provider.matches(&url))
    }
}

// ── Workloads ─────────────────────────────────────────────────────

/// Identity of an LRP instance: `(process_guid, index)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LrpKey {
    pub process_guid: String,
    pub index: u32,
}

impl fmt::Display for LrpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.process_guid, self.index)
    }
}

/// One instance of a long-running process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lrp {
    pub process_guid: String,
    pub index: u32,
    pub root_fs: String,
    pub memory_mb: u64,
    pub disk_mb: u64,
}

impl Lrp {
    pub fn key(&self) -> LrpKey {
        LrpKey {
            process_guid: self.process_guid.clone(),
            index: self.index,
        }
    }

    /// Each instance occupies one container.
    pub fn resources(&self) -> Resources {
        Resources::new(self.memory_mb, self.disk_mb, 1)
    }
}

/// A one-shot task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_guid: String,
    pub root_fs: String,
    pub memory_mb: u64,
    pub disk_mb: u64,
}

impl Task {
    pub fn resources(&self) -> Resources {
        Resources::new(self.memory_mb, self.disk_mb, 1)
    }
}

/// Description of a replicated workload, independent of any index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredLrp {
    pub process_guid: String,
    pub root_fs: String,
    pub memory_mb: u64,
    pub disk_mb: u64,
}

impl DesiredLrp {
    pub fn instance(&self, index: u32) -> Lrp {
        Lrp {
            process_guid: self.process_guid.clone(),
            index,
            root_fs: self.root_fs.clone(),
            memory_mb: self.memory_mb,
            disk_mb: self.disk_mb,
        }
    }
}

/// Request to start some replica slots of a desired LRP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LrpStartRequest {
    pub desired: DesiredLrp,
    pub indices: BTreeSet<u32>,
}

impl LrpStartRequest {
    pub fn new(desired: DesiredLrp, indices: impl IntoIterator<Item = u32>) -> Self {
        Self {
            desired,
            indices: indices.into_iter().collect(),
        }
    }
}

// ── Cell state ────────────────────────────────────────────────────

/// Snapshot returned by a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellState {
    pub zone: ZoneId,
    pub root_fs_providers: RootFsProviders,
    pub total_resources: Resources,
    pub available_resources: Resources,
    #[serde(default)]
    pub lrps: Vec<Lrp>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub evacuating: bool,
}

impl CellState {
    /// An empty cell: everything available, nothing resident.
    pub fn new(zone: impl Into<ZoneId>, providers: RootFsProviders, total: Resources) -> Self {
        Self {
            zone: zone.into(),
            root_fs_providers: providers,
            total_resources: total,
            available_resources: total,
            lrps: Vec::new(),
            tasks: Vec::new(),
            evacuating: false,
        }
    }

    /// Reject snapshots that cannot be scored.
    pub fn validate(&self) -> StateResult<()> {
        let total = &self.total_resources;
        let available = &self.available_resources;
        let dims = [
            ("memory", total.memory_mb, available.memory_mb),
            ("disk", total.disk_mb, available.disk_mb),
            ("containers", total.containers, available.containers),
        ];
        for (dimension, total, available) in dims {
            if total == 0 {
                return Err(StateError::ZeroCapacity(dimension));
            }
            if available > total {
                return Err(StateError::AvailableExceedsTotal {
                    dimension,
                    available,
                    total,
                });
            }
        }
        Ok(())
    }

    /// Number of resident instances of a process.
    pub fn instance_count(&self, process_guid: &str) -> usize {
        self.lrps
            .iter()
            .filter(|lrp| lrp.process_guid == process_guid)
            .count()
    }

    /// Resources consumed by every resident workload.
    pub fn used_resources(&self) -> Resources {
        let lrps: Resources = self.lrps.iter().map(Lrp::resources).sum();
        let tasks: Resources = self.tasks.iter().map(Task::resources).sum();
        lrps + tasks
    }
}

// ── Work bundle ───────────────────────────────────────────────────

/// A bundle of work offered to, or rejected by, a cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    #[serde(default)]
    pub lrps: Vec<Lrp>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub stops: Vec<LrpKey>,
}

impl Work {
    pub fn is_empty(&self) -> bool {
        self.lrps.is_empty() && self.tasks.is_empty() && self.stops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lrps.len() + self.tasks.len() + self.stops.len()
    }

    /// Append every item of `other`.
    pub fn extend(&mut self, other: Work) {
        self.lrps.extend(other.lrps);
        self.tasks.extend(other.tasks);
        self.stops.extend(other.stops);
    }
}

// ── Auctions ──────────────────────────────────────────────────────

/// Reason an auction found no home, surfaced to the delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementError {
    CellMismatch,
    InsufficientResources,
}

impl fmt::Display for PlacementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementError::CellMismatch => f.write_str("CELL_MISMATCH"),
            PlacementError::InsufficientResources => f.write_str("INSUFFICIENT_RESOURCES"),
        }
    }
}

/// One placement attempt for an LRP instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LrpAuction {
    pub lrp: Lrp,
    pub queue_time: SystemTime,
    pub attempts: u32,
    pub winner: Option<CellId>,
    pub wait_duration: Duration,
    pub placement_error: Option<PlacementError>,
}

impl LrpAuction {
    pub fn new(lrp: Lrp, queue_time: SystemTime) -> Self {
        Self {
            lrp,
            queue_time,
            attempts: 0,
            winner: None,
            wait_duration: Duration::ZERO,
            placement_error: None,
        }
    }

    pub fn key(&self) -> LrpKey {
        self.lrp.key()
    }
}

/// One placement attempt for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAuction {
    pub task: Task,
    pub queue_time: SystemTime,
    pub attempts: u32,
    pub winner: Option<CellId>,
    pub wait_duration: Duration,
    pub placement_error: Option<PlacementError>,
}

impl TaskAuction {
    pub fn new(task: Task, queue_time: SystemTime) -> Self {
        Self {
            task,
            queue_time,
            attempts: 0,
            winner: None,
            wait_duration: Duration::ZERO,
            placement_error: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.task.task_guid
    }
}

/// Outcome of one scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionResults {
    pub successful_lrps: Vec<LrpAuction>,
    pub successful_tasks: Vec<TaskAuction>,
    pub failed_lrps: Vec<LrpAuction>,
    pub failed_tasks: Vec<TaskAuction>,
}

impl AuctionResults {
    pub fn is_empty(&self) -> bool {
        self.successful_lrps.is_empty()
            && self.successful_tasks.is_empty()
            && self.failed_lrps.is_empty()
            && self.failed_tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_providers() -> RootFsProviders {
        RootFsProviders::new()
            .with("preloaded", RootFsProvider::fixed(["cflinuxfs4"]))
            .with("docker", RootFsProvider::Arbitrary)
    }

    #[test]
    fn fits_in_is_componentwise() {
        let small = Resources::new(10, 10, 1);
        let big = Resources::new(100, 100, 10);
        assert!(small.fits_in(&big));
        assert!(!big.fits_in(&small));

        // Partial order: neither fits in the other.
        let a = Resources::new(100, 1, 1);
        let b = Resources::new(1, 100, 1);
        assert!(!a.fits_in(&b));
        assert!(!b.fits_in(&a));
    }

    #[test]
    fn checked_sub_rejects_negative_components() {
        let avail = Resources::new(100, 100, 1);
        assert_eq!(
            avail.checked_sub(&Resources::new(40, 50, 1)),
            Some(Resources::new(60, 50, 0))
        );
        assert_eq!(avail.checked_sub(&Resources::new(101, 0, 0)), None);
        assert_eq!(avail.checked_sub(&Resources::new(0, 0, 2)), None);
    }

    #[test]
    fn resources_sum() {
        let total: Resources = [Resources::new(1, 2, 1), Resources::new(3, 4, 1)]
            .into_iter()
            .sum();
        assert_eq!(total, Resources::new(4, 6, 2));
    }

    #[test]
    fn fixed_set_matches_exact_stack() {
        let providers = linux_providers();
        assert!(providers.matches("preloaded:cflinuxfs4"));
        assert!(!providers.matches("preloaded:cflinuxfs3"));
    }

    #[test]
    fn arbitrary_matches_any_url_with_scheme() {
        let providers = linux_providers();
        assert!(providers.matches("docker:///library/redis"));
        assert!(providers.matches("docker://registry.example.com/app#v2"));
    }

    #[test]
    fn unknown_scheme_and_garbage_do_not_match() {
        let providers = linux_providers();
        assert!(!providers.matches("oci:///image"));
        assert!(!providers.matches("not a url"));
        assert!(!RootFsProviders::new().matches("preloaded:cflinuxfs4"));
    }

    #[test]
    fn validate_rejects_zero_totals() {
        let state = CellState::new("z1", linux_providers(), Resources::new(100, 0, 10));
        assert_eq!(state.validate(), Err(StateError::ZeroCapacity("disk")));
    }

    #[test]
    fn validate_rejects_available_above_total() {
        let mut state = CellState::new("z1", linux_providers(), Resources::new(100, 100, 10));
        state.available_resources.containers = 11;
        assert!(matches!(
            state.validate(),
            Err(StateError::AvailableExceedsTotal { dimension: "containers", .. })
        ));
    }

    #[test]
    fn instance_count_and_used_resources() {
        let desired = DesiredLrp {
            process_guid: "pg-1".to_string(),
            root_fs: "preloaded:cflinuxfs4".to_string(),
            memory_mb: 10,
            disk_mb: 20,
        };
        let mut state = CellState::new("z1", linux_providers(), Resources::new(100, 100, 10));
        state.lrps.push(desired.instance(0));
        state.lrps.push(desired.instance(1));
        state.tasks.push(Task {
            task_guid: "t-1".to_string(),
            root_fs: "docker:///busybox".to_string(),
            memory_mb: 5,
            disk_mb: 5,
        });

        assert_eq!(state.instance_count("pg-1"), 2);
        assert_eq!(state.instance_count("pg-2"), 0);
        assert_eq!(state.used_resources(), Resources::new(25, 45, 3));
    }

    #[test]
    fn start_request_indices_are_a_set() {
        let desired = DesiredLrp {
            process_guid: "pg-1".to_string(),
            root_fs: "preloaded:cflinuxfs4".to_string(),
            memory_mb: 10,
            disk_mb: 10,
        };
        let request = LrpStartRequest::new(desired, [2, 0, 2, 1]);
        assert_eq!(request.indices.into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn placement_error_serializes_screaming_snake() {
        let json = serde_json::to_string(&PlacementError::InsufficientResources).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_RESOURCES\"");
        assert_eq!(PlacementError::CellMismatch.to_string(), "CELL_MISMATCH");
    }

    #[test]
    fn cell_state_parses_from_json_with_defaults() {
        let json = r#"{
            "zone": "z1",
            "root_fs_providers": {"preloaded": {"type": "fixed_set", "stacks": ["cflinuxfs4"]}},
            "total_resources": {"memory_mb": 100, "disk_mb": 100, "containers": 10},
            "available_resources": {"memory_mb": 100, "disk_mb": 100, "containers": 10}
        }"#;
        let state: CellState = serde_json::from_str(json).unwrap();
        assert!(state.lrps.is_empty());
        assert!(!state.evacuating);
        assert!(state.root_fs_providers.matches("preloaded:cflinuxfs4"));
    }
}
