//! Dwell-based selection over the target grid.
//!
//! Turns a continuous gaze/pointer stream into discrete selection events:
//! holding a target for longer than the dwell threshold selects it once,
//! then the stream stays suppressed on that target until it moves away,
//! the grid changes, or the suppression window elapses.  Moving to another
//! target restarts the timer; partial dwell time is never carried over.

use std::collections::HashMap;
use tracing::{debug, info, trace};

use super::grid::GridSnapshot;

/// Default dwell time before a hovered target is selected.
pub const DEFAULT_DWELL_THRESHOLD_MS: f64 = 1200.0;

/// Default re-fire suppression after a selection.
pub const DEFAULT_SUPPRESSION_MS: f64 = 999_999.0;

// ── Dwell config ────────────────────────────────────────────

/// Dwell timing configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DwellConfig {
    /// Milliseconds a target must be held before it is selected.
    pub threshold_ms: f64,
    /// Milliseconds a selected target stays suppressed while still held.
    pub suppression_ms: f64,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_DWELL_THRESHOLD_MS,
            suppression_ms: DEFAULT_SUPPRESSION_MS,
        }
    }
}

// ── Dwell state ─────────────────────────────────────────────

/// Per-stream selection state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DwellState {
    /// No target under the pointer.
    Idle,
    /// Holding a target since `since_ms`.
    Hovering { index: usize, since_ms: f64 },
    /// Target was selected; re-selection blocked until `until_ms`.
    Suppressed { index: usize, until_ms: f64 },
}

impl DwellState {
    /// Index of the target under the pointer, if any.
    pub fn active_index(&self) -> Option<usize> {
        match self {
            Self::Idle => None,
            Self::Hovering { index, .. } | Self::Suppressed { index, .. } => Some(*index),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Hovering { .. } => "hovering",
            Self::Suppressed { .. } => "suppressed",
        }
    }
}

// ── Samples and events ──────────────────────────────────────

/// One gaze or pointer sample in grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSample {
    pub x: f64,
    pub y: f64,
    /// Monotonic timestamp in milliseconds.
    pub timestamp_ms: f64,
}

impl PointSample {
    pub fn new(x: f64, y: f64, timestamp_ms: f64) -> Self {
        Self { x, y, timestamp_ms }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.timestamp_ms.is_finite()
    }
}

/// A dwell selection that completed on a target.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionEvent {
    pub stream_id: u64,
    pub index: usize,
    pub timestamp_ms: f64,
    /// How long the target was held before selection fired.
    pub dwell_ms: f64,
}

// ── Dwell stream ────────────────────────────────────────────

/// State machine for a single input stream.
#[derive(Debug, Clone)]
pub struct DwellStream {
    pub state: DwellState,
    /// Grid generation the current state refers to.
    generation: Option<u64>,
    /// Timestamp of the last accepted sample.
    last_timestamp_ms: Option<f64>,
}

impl Default for DwellStream {
    fn default() -> Self {
        Self {
            state: DwellState::Idle,
            generation: None,
            last_timestamp_ms: None,
        }
    }
}

impl DwellStream {
    /// Advance the state machine with one sample.
    pub fn on_sample(
        &mut self,
        stream_id: u64,
        sample: &PointSample,
        grid: &GridSnapshot,
        config: &DwellConfig,
    ) -> Option<SelectionEvent> {
        // Malformed samples leave the state untouched.
        if !sample.is_finite() {
            trace!(stream_id, "dropping non-finite sample");
            return None;
        }
        if let Some(last) = self.last_timestamp_ms {
            if sample.timestamp_ms < last {
                trace!(stream_id, ts = sample.timestamp_ms, last, "dropping out-of-order sample");
                return None;
            }
        }
        self.last_timestamp_ms = Some(sample.timestamp_ms);

        if self.generation != Some(grid.generation) {
            if let Some(index) = self.state.active_index() {
                debug!(stream_id, index, generation = grid.generation, "grid changed, dwell invalidated");
            }
            self.state = DwellState::Idle;
            self.generation = Some(grid.generation);
        }

        let now = sample.timestamp_ms;
        let index = match grid.target_at(sample.x, sample.y) {
            Some(target) => target.index,
            None => {
                self.state = DwellState::Idle;
                return None;
            }
        };

        match self.state {
            DwellState::Hovering { index: held, since_ms } if held == index => {
                let elapsed = now - since_ms;
                if elapsed > config.threshold_ms {
                    self.state = DwellState::Suppressed {
                        index,
                        until_ms: now + config.suppression_ms,
                    };
                    debug!(stream_id, index, dwell_ms = elapsed, "dwell selection");
                    return Some(SelectionEvent {
                        stream_id,
                        index,
                        timestamp_ms: now,
                        dwell_ms: elapsed,
                    });
                }
                None
            }
            DwellState::Suppressed { index: held, until_ms } if held == index => {
                if now >= until_ms {
                    trace!(stream_id, index, "suppression elapsed, new dwell episode");
                    self.state = DwellState::Hovering {
                        index,
                        since_ms: now,
                    };
                }
                None
            }
            _ => {
                trace!(stream_id, index, "hover started");
                self.state = DwellState::Hovering {
                    index,
                    since_ms: now,
                };
                None
            }
        }
    }

    /// Force the stream back to idle and clear suppression.
    pub fn reset(&mut self) {
        self.state = DwellState::Idle;
        self.generation = None;
    }
}

// ── Dwell selector ──────────────────────────────────────────

/// Dwell state machines keyed by input stream.
#[derive(Debug, Clone, Default)]
pub struct DwellSelector {
    pub config: DwellConfig,
    streams: HashMap<u64, DwellStream>,
}

impl DwellSelector {
    pub fn new(config: DwellConfig) -> Self {
        Self {
            config,
            streams: HashMap::new(),
        }
    }

    /// Feed a sample for `stream_id`, creating the stream on first use.
    pub fn on_sample(
        &mut self,
        stream_id: u64,
        sample: &PointSample,
        grid: &GridSnapshot,
    ) -> Option<SelectionEvent> {
        self.streams
            .entry(stream_id)
            .or_default()
            .on_sample(stream_id, sample, grid, &self.config)
    }

    pub fn state(&self, stream_id: u64) -> DwellState {
        self.streams
            .get(&stream_id)
            .map(|s| s.state)
            .unwrap_or(DwellState::Idle)
    }

    /// Target currently under the stream's pointer, for highlighting.
    pub fn hover_index(&self, stream_id: u64) -> Option<usize> {
        self.state(stream_id).active_index()
    }

    /// Tear down one stream (e.g. tracker lost).
    pub fn end_stream(&mut self, stream_id: u64) -> bool {
        self.streams.remove(&stream_id).is_some()
    }

    /// Return every stream to idle without forgetting it (grid rebuilt).
    pub fn invalidate(&mut self) {
        for stream in self.streams.values_mut() {
            stream.reset();
        }
    }

    /// Drop all streams (mode switched away from gaze).
    pub fn teardown(&mut self) {
        if !self.streams.is_empty() {
            debug!(streams = self.streams.len(), "dwell streams torn down");
        }
        self.streams.clear();
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn set_threshold(&mut self, threshold_ms: f64) {
        self.config.threshold_ms = threshold_ms;
        info!("Dwell threshold set to {:.0}ms", threshold_ms);
    }

    /// IPC status s-expression for all streams.
    pub fn status_sexp(&self) -> String {
        let mut ids: Vec<&u64> = self.streams.keys().collect();
        ids.sort();
        let mut streams = String::from("(");
        for id in ids {
            let state = self.streams[id].state;
            let index = state
                .active_index()
                .map(|i| i.to_string())
                .unwrap_or_else(|| "nil".to_string());
            streams.push_str(&format!(
                "(:stream {} :state :{} :index {})",
                id,
                state.as_str(),
                index
            ));
        }
        streams.push(')');
        format!(
            "(:threshold-ms {:.0} :suppression-ms {:.0} :streams {})",
            self.config.threshold_ms, self.config.suppression_ms, streams
        )
    }
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::grid::{Board, Rect, DEFAULT_BOARD};

    const THRESHOLD: f64 = DEFAULT_DWELL_THRESHOLD_MS;

    fn make_board() -> Board {
        let labels = DEFAULT_BOARD.iter().map(|s| s.to_string()).collect();
        // 4 columns x 3 rows of 100x100 cells.
        Board::new(labels, Rect::new(0.0, 0.0, 400.0, 300.0), 4)
    }

    /// Center of the cell holding `index` on a 4-column, 100px grid.
    fn center_of(index: usize) -> (f64, f64) {
        let col = (index % 4) as f64;
        let row = (index / 4) as f64;
        (col * 100.0 + 50.0, row * 100.0 + 50.0)
    }

    fn sample_at(index: usize, t: f64) -> PointSample {
        let (x, y) = center_of(index);
        PointSample::new(x, y, t)
    }

    /// Hold `index` from `start` to `end` (inclusive) at 50ms intervals.
    fn hold(
        sel: &mut DwellSelector,
        grid: &GridSnapshot,
        index: usize,
        start: f64,
        end: f64,
    ) -> Vec<SelectionEvent> {
        let mut events = Vec::new();
        let mut t = start;
        while t <= end {
            if let Some(e) = sel.on_sample(0, &sample_at(index, t), grid) {
                events.push(e);
            }
            t += 50.0;
        }
        events
    }

    #[test]
    fn test_single_fire_per_episode() {
        let board = make_board();
        let mut sel = DwellSelector::default();

        let events = hold(&mut sel, board.snapshot(), 3, 0.0, THRESHOLD + 50.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 3);
        assert!(events[0].dwell_ms > THRESHOLD);
        assert!(matches!(sel.state(0), DwellState::Suppressed { index: 3, .. }));

        // Keep holding for another full threshold: nothing more fires.
        let more = hold(&mut sel, board.snapshot(), 3, THRESHOLD + 100.0, 2.0 * THRESHOLD + 200.0);
        assert!(more.is_empty());
        assert_eq!(sel.hover_index(0), Some(3));
    }

    #[test]
    fn test_no_fire_at_exact_threshold() {
        let board = make_board();
        let mut sel = DwellSelector::default();
        sel.on_sample(0, &sample_at(2, 0.0), board.snapshot());
        assert!(sel.on_sample(0, &sample_at(2, THRESHOLD), board.snapshot()).is_none());
        assert!(sel.on_sample(0, &sample_at(2, THRESHOLD + 1.0), board.snapshot()).is_some());
    }

    #[test]
    fn test_partial_dwell_not_carried_over() {
        let board = make_board();
        let grid = board.snapshot();
        let mut sel = DwellSelector::default();

        assert!(hold(&mut sel, grid, 3, 0.0, 0.9 * THRESHOLD).is_empty());
        assert!(sel.on_sample(0, &sample_at(5, 0.9 * THRESHOLD + 50.0), grid).is_none());

        // Back to 3: the timer starts over.
        let back = 0.9 * THRESHOLD + 100.0;
        assert!(hold(&mut sel, grid, 3, back, back + 0.9 * THRESHOLD).is_empty());
        assert_eq!(
            sel.state(0),
            DwellState::Hovering {
                index: 3,
                since_ms: back
            }
        );
    }

    #[test]
    fn test_grid_rebuild_invalidates_dwell() {
        let mut board = make_board();
        let mut sel = DwellSelector::default();
        assert!(hold(&mut sel, board.snapshot(), 7, 0.0, 0.8 * THRESHOLD).is_empty());

        // "toilet" (index 7) is blocked; "drink" moves into slot 7.
        board.block("toilet");
        let grid = board.snapshot();

        // Continuing past the original deadline must not fire for the stale dwell.
        let resumed = 0.8 * THRESHOLD + 50.0;
        let fired = hold(&mut sel, grid, 7, resumed, THRESHOLD + 300.0);
        assert!(fired.is_empty());
        assert_eq!(
            sel.state(0),
            DwellState::Hovering {
                index: 7,
                since_ms: resumed
            }
        );
    }

    #[test]
    fn test_invalidate_clears_suppression() {
        let board = make_board();
        let grid = board.snapshot();
        let mut sel = DwellSelector::default();
        assert_eq!(hold(&mut sel, grid, 1, 0.0, THRESHOLD + 50.0).len(), 1);

        sel.invalidate();
        assert_eq!(sel.state(0), DwellState::Idle);
        let start = THRESHOLD + 100.0;
        let events = hold(&mut sel, grid, 1, start, start + THRESHOLD + 50.0);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_outside_grid_goes_idle() {
        let board = make_board();
        let grid = board.snapshot();
        let mut sel = DwellSelector::default();
        hold(&mut sel, grid, 0, 0.0, 500.0);
        sel.on_sample(0, &PointSample::new(900.0, 900.0, 550.0), grid);
        assert_eq!(sel.state(0), DwellState::Idle);

        // Returning restarts the dwell.
        sel.on_sample(0, &sample_at(0, 600.0), grid);
        assert!(sel.on_sample(0, &sample_at(0, 1300.0), grid).is_none());
    }

    #[test]
    fn test_non_finite_sample_does_not_reset() {
        let board = make_board();
        let grid = board.snapshot();
        let mut sel = DwellSelector::default();
        sel.on_sample(0, &sample_at(4, 0.0), grid);
        sel.on_sample(0, &PointSample::new(f64::NAN, 10.0, 600.0), grid);
        sel.on_sample(0, &PointSample::new(10.0, f64::INFINITY, 700.0), grid);
        assert_eq!(
            sel.state(0),
            DwellState::Hovering {
                index: 4,
                since_ms: 0.0
            }
        );
        assert!(sel.on_sample(0, &sample_at(4, THRESHOLD + 10.0), grid).is_some());
    }

    #[test]
    fn test_out_of_order_sample_dropped() {
        let board = make_board();
        let grid = board.snapshot();
        let mut sel = DwellSelector::default();
        sel.on_sample(0, &sample_at(4, 1000.0), grid);
        sel.on_sample(0, &sample_at(6, 900.0), grid);
        assert_eq!(sel.hover_index(0), Some(4));
    }

    #[test]
    fn test_duplicate_sample_cannot_double_fire() {
        let board = make_board();
        let grid = board.snapshot();
        let mut sel = DwellSelector::default();
        sel.on_sample(0, &sample_at(4, 0.0), grid);
        let s = sample_at(4, THRESHOLD + 10.0);
        assert!(sel.on_sample(0, &s, grid).is_some());
        assert!(sel.on_sample(0, &s, grid).is_none());
    }

    #[test]
    fn test_suppression_elapses_into_new_episode() {
        let board = make_board();
        let grid = board.snapshot();
        let mut sel = DwellSelector::new(DwellConfig {
            threshold_ms: 100.0,
            suppression_ms: 500.0,
        });
        sel.on_sample(0, &sample_at(2, 0.0), grid);
        assert!(sel.on_sample(0, &sample_at(2, 150.0), grid).is_some());
        assert!(sel.on_sample(0, &sample_at(2, 600.0), grid).is_none());
        assert!(matches!(sel.state(0), DwellState::Suppressed { until_ms, .. } if until_ms == 650.0));
        assert!(sel.on_sample(0, &sample_at(2, 650.0), grid).is_none());
        assert_eq!(
            sel.state(0),
            DwellState::Hovering {
                index: 2,
                since_ms: 650.0
            }
        );
        assert!(sel.on_sample(0, &sample_at(2, 800.0), grid).is_some());
    }

    #[test]
    fn test_empty_cell_is_not_a_target() {
        let labels = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string(), "e".to_string()];
        let board = Board::new(labels, Rect::new(0.0, 0.0, 400.0, 200.0), 4);
        let grid = board.snapshot();
        let mut sel = DwellSelector::default();
        sel.on_sample(0, &PointSample::new(350.0, 150.0, 0.0), grid);
        assert_eq!(sel.state(0), DwellState::Idle);
        assert!(sel.on_sample(0, &PointSample::new(350.0, 150.0, 5000.0), grid).is_none());
    }

    #[test]
    fn test_streams_are_independent() {
        let board = make_board();
        let grid = board.snapshot();
        let mut sel = DwellSelector::default();
        sel.on_sample(0, &sample_at(1, 0.0), grid);
        sel.on_sample(1, &sample_at(2, 0.0), grid);
        assert_eq!(sel.hover_index(0), Some(1));
        assert_eq!(sel.hover_index(1), Some(2));
        assert_eq!(sel.stream_count(), 2);

        assert!(sel.end_stream(1));
        assert_eq!(sel.hover_index(1), None);

        sel.teardown();
        assert_eq!(sel.stream_count(), 0);
        assert_eq!(sel.state(0), DwellState::Idle);
    }

    #[test]
    fn test_status_sexp_is_valid() {
        let board = make_board();
        let mut sel = DwellSelector::default();
        sel.on_sample(0, &sample_at(1, 0.0), board.snapshot());
        let sexp = sel.status_sexp();
        assert!(sexp.contains(":state :hovering"));
        assert!(lexpr::from_str(&sexp).is_ok());
    }
}
