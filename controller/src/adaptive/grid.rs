//! Target grid — board labels, blocklist filtering, and cell geometry.
//!
//! The visible target list is rebuilt whenever the board contents, the
//! blocklist, or the grid geometry change.  Every rebuild bumps a
//! generation counter so consumers holding an older snapshot can tell
//! that positional indices have been invalidated.

use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::ipc::plist::quote;

/// Board shown when no labels have been configured.
pub const DEFAULT_BOARD: [&str; 12] = [
    "I", "want", "help", "more", "stop", "yes", "no", "toilet", "drink", "eat", "play", "thanks",
];

/// Default number of grid columns.
pub const DEFAULT_COLUMNS: usize = 4;

// ── Rect ────────────────────────────────────────────────────

/// Axis-aligned rectangle in grid coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Rect {
    fn default() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width: 1920.0,
            height: 1080.0,
        }
    }
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Whether point (x, y) lies inside the rectangle (edges inclusive).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x <= self.right() && y >= self.top && y <= self.bottom()
    }

    /// Whether the rectangle has a usable, finite area.
    pub fn is_valid(&self) -> bool {
        [self.left, self.top, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn to_sexp(&self) -> String {
        format!(
            "(:left {:.1} :top {:.1} :width {:.1} :height {:.1})",
            self.left, self.top, self.width, self.height
        )
    }
}

// ── Target ──────────────────────────────────────────────────

/// A selectable item at a positional index of the current filtered grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub index: usize,
    pub label: String,
    pub bounds: Rect,
    pub enabled: bool,
}

// ── Grid snapshot ───────────────────────────────────────────

/// Immutable view of the filtered grid at one generation.
#[derive(Debug, Clone)]
pub struct GridSnapshot {
    /// Rebuild counter; changes whenever indices may have shifted.
    pub generation: u64,
    /// Bounding rectangle of the whole grid.
    pub bounds: Rect,
    pub cols: usize,
    pub rows: usize,
    pub targets: Vec<Target>,
}

impl GridSnapshot {
    /// Lay out `labels` row-major into `cols` columns inside `bounds`.
    pub fn build(generation: u64, bounds: Rect, cols: usize, labels: &[String]) -> Self {
        let cols = cols.max(1);
        let rows = labels.len().div_ceil(cols).max(1);
        let cell_w = bounds.width / cols as f64;
        let cell_h = bounds.height / rows as f64;

        let targets = labels
            .iter()
            .enumerate()
            .map(|(index, label)| {
                let col = index % cols;
                let row = index / cols;
                Target {
                    index,
                    label: label.clone(),
                    bounds: Rect::new(
                        bounds.left + col as f64 * cell_w,
                        bounds.top + row as f64 * cell_h,
                        cell_w,
                        cell_h,
                    ),
                    enabled: true,
                }
            })
            .collect();

        Self {
            generation,
            bounds,
            cols,
            rows,
            targets,
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target(&self, index: usize) -> Option<&Target> {
        self.targets.get(index)
    }

    /// Map a point to a grid cell index using column/row geometry.
    ///
    /// Returns `None` when the point lies outside the grid rectangle.  The
    /// returned cell may be past the last target when the final row is only
    /// partially filled.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<usize> {
        if !self.bounds.is_valid() || !self.bounds.contains(x, y) {
            return None;
        }
        let cell_w = self.bounds.width / self.cols as f64;
        let cell_h = self.bounds.height / self.rows as f64;
        let col = ((x - self.bounds.left) / cell_w).floor().clamp(0.0, (self.cols - 1) as f64);
        let row = ((y - self.bounds.top) / cell_h).floor().clamp(0.0, (self.rows - 1) as f64);
        Some(row as usize * self.cols + col as usize)
    }

    /// The enabled target under point (x, y), if any.
    pub fn target_at(&self, x: f64, y: f64) -> Option<&Target> {
        self.cell_at(x, y)
            .and_then(|i| self.target(i))
            .filter(|t| t.enabled)
    }

    /// IPC s-expression listing every target with its geometry.
    pub fn status_sexp(&self) -> String {
        let mut targets = String::from("(");
        for t in &self.targets {
            targets.push_str(&format!(
                "(:index {} :label {} :enabled {} :bounds {})",
                t.index,
                quote(&t.label),
                if t.enabled { "t" } else { "nil" },
                t.bounds.to_sexp(),
            ));
        }
        targets.push(')');
        format!(
            "(:generation {} :cols {} :rows {} :count {} :bounds {} :targets {})",
            self.generation,
            self.cols,
            self.rows,
            self.targets.len(),
            self.bounds.to_sexp(),
            targets,
        )
    }
}

// ── Board ───────────────────────────────────────────────────

/// Board contents plus blocklist; owns the current grid snapshot.
#[derive(Debug, Clone)]
pub struct Board {
    labels: Vec<String>,
    blocked: BTreeSet<String>,
    bounds: Rect,
    cols: usize,
    snapshot: GridSnapshot,
}

/// Blocklist entries and label comparisons are case-insensitive.
fn normalize_word(word: &str) -> String {
    word.trim().to_lowercase()
}

/// Trim labels and drop the blank ones.
pub fn normalize_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    labels
        .into_iter()
        .map(|l| l.as_ref().trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

impl Board {
    pub fn new(labels: Vec<String>, bounds: Rect, cols: usize) -> Self {
        let mut board = Self {
            labels: normalize_labels(labels),
            blocked: BTreeSet::new(),
            bounds,
            cols: cols.max(1),
            snapshot: GridSnapshot::build(0, bounds, cols, &[]),
        };
        board.rebuild();
        board
    }

    /// Current filtered grid.
    pub fn snapshot(&self) -> &GridSnapshot {
        &self.snapshot
    }

    /// All board labels, including blocked ones.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_blocked(&self, label: &str) -> bool {
        self.blocked.contains(&normalize_word(label))
    }

    /// Blocked words in sorted order.
    pub fn blocklist(&self) -> impl Iterator<Item = &str> {
        self.blocked.iter().map(String::as_str)
    }

    /// Replace the board contents.
    pub fn set_labels(&mut self, labels: Vec<String>) {
        self.labels = normalize_labels(labels);
        self.rebuild();
    }

    /// Change grid bounds and column count.
    pub fn set_geometry(&mut self, bounds: Rect, cols: usize) {
        self.bounds = bounds;
        self.cols = cols.max(1);
        self.rebuild();
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Block a word.  Returns true if the blocklist changed.
    pub fn block(&mut self, word: &str) -> bool {
        let word = normalize_word(word);
        if word.is_empty() || !self.blocked.insert(word) {
            return false;
        }
        self.rebuild();
        true
    }

    /// Unblock a word.  Returns true if the blocklist changed.
    pub fn unblock(&mut self, word: &str) -> bool {
        if !self.blocked.remove(&normalize_word(word)) {
            return false;
        }
        self.rebuild();
        true
    }

    /// Replace the whole blocklist.  Returns true if it changed.
    pub fn set_blocklist<I, S>(&mut self, words: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next: BTreeSet<String> = words
            .into_iter()
            .map(|w| normalize_word(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect();
        if next == self.blocked {
            return false;
        }
        self.blocked = next;
        self.rebuild();
        true
    }

    fn rebuild(&mut self) {
        let visible: Vec<String> = self
            .labels
            .iter()
            .filter(|l| !self.blocked.contains(&normalize_word(l)))
            .cloned()
            .collect();
        let generation = self.snapshot.generation + 1;
        self.snapshot = GridSnapshot::build(generation, self.bounds, self.cols, &visible);

        if self.labels.len() != visible.len() {
            debug!(
                hidden = self.labels.len() - visible.len(),
                "blocklist filtered board targets"
            );
        }
        info!(
            generation,
            targets = visible.len(),
            cols = self.snapshot.cols,
            rows = self.snapshot.rows,
            "grid rebuilt"
        );
    }
}

// ── Tests ───────────────────────────────────────────────────
