//! auction-runner — the long-lived side of the auctioneer.
//!
//! Producers submit LRP start requests and tasks to a [`Batch`]. A single
//! [`Runner`] task waits for readiness, asks its [`AuctionDelegate`] for
//! the current cells, runs a scheduling pass, hands failures to the
//! [`Retrier`], and reports each pass back to the delegate.
//!
//! # Architecture
//!
//! ```text
//! Runner
//!   ├── Batch (producer intake, coalescing readiness)
//!   ├── ZoneBuilder ─┐
//!   ├── Scheduler  ──┴── WorkPool (shared, bounded)
//!   ├── Retrier (resubmit into Batch or finalize)
//!   └── AuctionDelegate (cell discovery + result sink)
//! ```
//!
//! [`simulation`] provides in-memory cells and a recording delegate.

pub mod batch;
pub mod delegate;
pub mod error;
pub mod metrics;
pub mod retrier;
pub mod runner;
pub mod simulation;

pub use batch::Batch;
pub use delegate::AuctionDelegate;
pub use error::{RunnerError, RunnerResult};
pub use metrics::{AuctionCounters, CountersSnapshot};
pub use retrier::Retrier;
pub use runner::Runner;
pub use simulation::{SimulatedCell, SimulationDelegate};
