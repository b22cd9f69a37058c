//! Capabilities the auctioneer consumes from cells.

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::types::{CellState, Work};

/// State retrieval and work commit for one cell.
///
/// The transport behind it is opaque: an HTTP client, an in-process
/// simulation, or a test double.
#[async_trait]
pub trait CellClient: Send + Sync {
    /// Current snapshot of the cell. Idempotent and safe to call concurrently.
    async fn state(&self) -> ClientResult<CellState>;

    /// Offer a bundle of work. Returns the subset the cell rejected.
    async fn perform(&self, work: Work) -> ClientResult<Work>;
}

/// A cell client whose state can be restored, used by simulations.
#[async_trait]
pub trait SimClient: CellClient {
    async fn reset(&self) -> ClientResult<()>;
}
