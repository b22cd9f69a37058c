//! The consumer-facing seam of the runner.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use auction_state::{AuctionResults, CellClient, CellId};

/// Supplies cells to auction against and receives every pass's outcome.
#[async_trait]
pub trait AuctionDelegate: Send + Sync {
    /// Clients for every cell currently known. Errors are treated as
    /// transient: the runner cools down and tries again.
    async fn fetch_cell_reps(&self) -> anyhow::Result<HashMap<CellId, Arc<dyn CellClient>>>;

    /// Called once per pass that had work, on a detached task.
    async fn auction_completed(&self, results: AuctionResults);
}
