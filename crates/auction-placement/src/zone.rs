//! Cells grouped by failure domain.

use std::collections::BTreeMap;

use auction_state::ZoneId;

use crate::cell::Cell;

/// All zones of one pass, keyed by zone id.
pub type Zones = BTreeMap<ZoneId, Zone>;

/// Cells that share a zone, in insertion order.
#[derive(Debug)]
pub struct Zone {
    id: ZoneId,
    cells: Vec<Cell>,
}

impl Zone {
    pub fn new(id: impl Into<ZoneId>) -> Self {
        Self {
            id: id.into(),
            cells: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Instances of `process_guid` across every cell in the zone.
    pub fn instance_count(&self, process_guid: &str) -> usize {
        self.cells
            .iter()
            .map(|cell| cell.instance_count(process_guid))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClient, state_with};
    use auction_state::{CellClient, Resources};
    use std::sync::Arc;

    fn cell(id: &str, residents: &[(&str, u32, u64)]) -> Cell {
        let client: Arc<dyn CellClient> = Arc::new(FakeClient::default());
        Cell::new(id, client, state_with("z1", Resources::new(1000, 1000, 100), residents))
    }

    #[test]
    fn instance_count_sums_across_cells() {
        let mut zone = Zone::new("z1");
        zone.push(cell("a", &[("pg-1", 2, 10), ("pg-2", 1, 10)]));
        zone.push(cell("b", &[("pg-1", 1, 10)]));

        assert_eq!(zone.instance_count("pg-1"), 3);
        assert_eq!(zone.instance_count("pg-2"), 1);
        assert_eq!(zone.instance_count("pg-3"), 0);
    }

    #[test]
    fn preserves_insertion_order() {
        let mut zone = Zone::new("z1");
        zone.push(cell("b", &[]));
        zone.push(cell("a", &[]));
        let ids: Vec<_> = zone.cells().iter().map(Cell::id).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(zone.len(), 2);
        assert_eq!(zone.id(), "z1");
    }
}
