//! Switch scanning: a highlight cursor stepped by a "next" switch and
//! confirmed by a "select" switch.  Selection is immediate (no dwell).

use tracing::trace;

use super::grid::GridSnapshot;

#[derive(Debug, Clone, Default)]
pub struct SwitchScanner {
    cursor: Option<usize>,
    generation: Option<u64>,
}

impl SwitchScanner {
    /// Drop the cursor if the grid has been rebuilt since it was placed.
    fn sync(&mut self, grid: &GridSnapshot) {
        if self.generation != Some(grid.generation) {
            self.cursor = None;
            self.generation = Some(grid.generation);
        }
    }

    /// Advance to the next target, wrapping at the end.
    pub fn next(&mut self, grid: &GridSnapshot) -> Option<usize> {
        self.sync(grid);
        if grid.is_empty() {
            self.cursor = None;
            return None;
        }
        let next = match self.cursor {
            Some(i) => (i + 1) % grid.len(),
            None => 0,
        };
        self.cursor = Some(next);
        trace!(index = next, "scan cursor advanced");
        self.cursor
    }

    /// Target under the cursor, if it is still valid.
    pub fn select(&mut self, grid: &GridSnapshot) -> Option<usize> {
        self.sync(grid);
        self.cursor.filter(|&i| grid.target(i).is_some_and(|t| t.enabled))
    }

    pub fn reset(&mut self) {
        self.cursor = None;
        self.generation = None;
    }
}
