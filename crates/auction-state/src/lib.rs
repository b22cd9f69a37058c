//! auction-state — data model and cell capability for the auctioneer.
//!
//! Holds the resource arithmetic, root filesystem matching, workload and
//! auction records, and the `CellClient` trait through which the
//! scheduler talks to cells. Nothing here is persisted; cells own their
//! own state and every `CellState` is a point-in-time snapshot.

pub mod client;
pub mod error;
pub mod types;

pub use client::{CellClient, SimClient};
pub use error::{CellClientError, ClientResult, StateError, StateResult};
pub use types::*;
