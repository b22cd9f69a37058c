//! Builds the per-pass view of the cluster.
//!
//! Every known cell is asked for its state through the shared worker
//! pool. Cells that stay unreachable, that are evacuating, or whose
//! snapshot fails validation are left out of the pass; none of these
//! abort the build.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use auction_state::{CellClient, CellId, CellState};

use crate::cell::Cell;
use crate::pool::WorkPool;
use crate::zone::{Zone, Zones};

pub struct ZoneBuilder {
    pool: WorkPool,
    fetch_attempts: u32,
}

impl ZoneBuilder {
    /// `fetch_attempts` is the number of tries per cell; zero is treated as one.
    pub fn new(pool: WorkPool, fetch_attempts: u32) -> Self {
        Self {
            pool,
            fetch_attempts: fetch_attempts.max(1),
        }
    }

    pub async fn build(&self, clients: HashMap<CellId, Arc<dyn CellClient>>) -> Zones {
        let requested = clients.len();
        let attempts = self.fetch_attempts;

        let jobs = clients.into_iter().map(|(cell_id, client)| async move {
            let state = fetch_state(&cell_id, client.as_ref(), attempts).await;
            (cell_id, client, state)
        });
        let fetched = self.pool.run_all(jobs).await;

        let mut zones = Zones::new();
        let mut included = 0usize;
        for (cell_id, client, state) in fetched {
            let Some(state) = state else { continue };

            if state.evacuating {
                debug!(cell = %cell_id, "cell is evacuating, excluded from pass");
                continue;
            }
            if let Err(e) = state.validate() {
                warn!(cell = %cell_id, error = %e, "cell reported invalid capacity, excluded from pass");
                continue;
            }

            included += 1;
            zones
                .entry(state.zone.clone())
                .or_insert_with(|| Zone::new(state.zone.clone()))
                .push(Cell::new(cell_id, client, state));
        }

        info!(
            requested,
            included,
            zones = zones.len(),
            "built zones"
        );
        zones
    }
}

async fn fetch_state(cell_id: &str, client: &dyn CellClient, attempts: u32) -> Option<CellState> {
    for attempt in 1..=attempts {
        match client.state().await {
            Ok(state) => return Some(state),
            Err(e) => debug!(cell = %cell_id, attempt, error = %e, "state fetch failed"),
        }
    }
    warn!(cell = %cell_id, attempts, "giving up on cell state, excluded from pass");
    None
}
