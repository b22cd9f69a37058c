//! Auctioneer placement core — cell ledgers, zones, and the scheduling pass.
//!
//! Each pass starts from a fresh snapshot of every reachable cell and
//! decides, for a batch of LRP and task auctions, which cell runs what.
//! Nothing here persists between passes.
//!
//! # Components
//!
//! - **`pool`** — Bounded worker pool for fan-out calls to cells
//! - **`zone_builder`** — Fetches cell state and groups cells by zone
//! - **`cell`** — Simulated per-cell ledger, scoring, and commit
//! - **`scheduler`** — Ordering, zone-aware placement, and reconciliation

pub mod cell;
pub mod error;
pub mod pool;
pub mod scheduler;
pub mod zone;
pub mod zone_builder;

#[cfg(test)]
mod testing;

pub use cell::{Cell, CommitFuture};
pub use error::{ScoreError, ScoreResult};
pub use pool::WorkPool;
pub use scheduler::{Scheduler, sort_lrp_auctions, sort_task_auctions};
pub use zone::{Zone, Zones};
pub use zone_builder::ZoneBuilder;
