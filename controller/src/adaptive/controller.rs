//! Session controller. Owns the board, the dwell selector, the switch
//! scanner, the method tracker and the current affect, and turns sensor
//! input into selection and adaptation events.
//!
//! All entry points are synchronous and return the events they produced;
//! the daemon broadcasts them.  Speech and telemetry go through
//! [`SideEffects`] and their failures never affect selection.

use std::fmt;

use tracing::{debug, info, trace};

use super::affect::{classify, AffectKind, AffectLabel, AffectThresholds, ExpressionVector};
use super::dwell::{DwellSelector, PointSample};
use super::grid::{normalize_labels, Board, Rect};
use super::method_tracker::{InputMethod, MethodTracker};
use super::policy::{adapt, AdaptationDirective};
use super::switch_scan::SwitchScanner;
use crate::config::{AacConfig, NominalLatency};
use crate::ipc::plist::quote;

// ── Collaborators ───────────────────────────────────────────

/// One performance observation handed to telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSample {
    pub method: InputMethod,
    pub duration_ms: f64,
    pub errored: bool,
    /// Recommendation after this sample was recorded.
    pub best: InputMethod,
}

/// Best-effort outputs of a selection.
pub trait SideEffects {
    /// Request playback of a selected label.
    fn speak(&mut self, label: &str) -> anyhow::Result<()>;
    /// Report a performance sample.
    fn report(&mut self, sample: &PerformanceSample) -> anyhow::Result<()>;
}

// ── Sample space ────────────────────────────────────────────

/// Coordinate space of an incoming gaze/pointer sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleSpace {
    /// Grid coordinates.
    #[default]
    Absolute,
    /// [0, 1] fractions of the viewport.
    Normalized,
}

impl SampleSpace {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "absolute" => Some(Self::Absolute),
            "normalized" | "normalised" => Some(Self::Normalized),
            _ => None,
        }
    }
}

// ── Events ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A target was confirmed.
    Selected {
        method: InputMethod,
        index: usize,
        label: String,
    },
    /// Highlighted target changed (`None` clears the highlight).
    Hover { index: Option<usize> },
    ModeChanged { from: InputMethod, to: InputMethod },
    Affect(AffectLabel),
    Adaptation(AdaptationDirective),
    BestMethod(InputMethod),
    GridRebuilt { generation: u64, count: usize },
    Phrase { text: String },
}

impl ControllerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Selected { .. } => "selection",
            Self::Hover { .. } => "hover",
            Self::ModeChanged { .. } => "mode-changed",
            Self::Affect(_) => "affect",
            Self::Adaptation(_) => "adaptation",
            Self::BestMethod(_) => "best-method",
            Self::GridRebuilt { .. } => "grid-rebuilt",
            Self::Phrase { .. } => "phrase",
        }
    }

    /// Convert the event to an IPC s-expression.
    pub fn to_sexp(&self) -> String {
        match self {
            Self::Selected {
                method,
                index,
                label,
            } => format!(
                "(:type :event :event :selection :method :{} :index {} :label {})",
                method.as_str(),
                index,
                quote(label)
            ),
            Self::Hover { index } => format!(
                "(:type :event :event :hover :index {})",
                index.map(|i| i.to_string()).unwrap_or_else(|| "nil".to_string())
            ),
            Self::ModeChanged { from, to } => format!(
                "(:type :event :event :mode-changed :from :{} :to :{})",
                from.as_str(),
                to.as_str()
            ),
            Self::Affect(label) => format!(
                "(:type :event :event :affect :label :{} :score {:.3})",
                label.kind.as_str(),
                label.score
            ),
            Self::Adaptation(d) => format!(
                "(:type :event :event :adaptation :layout :{} :rate :{})",
                d.layout.as_str(),
                d.rate_hint.as_str()
            ),
            Self::BestMethod(method) => format!(
                "(:type :event :event :best-method :method :{})",
                method.as_str()
            ),
            Self::GridRebuilt { generation, count } => format!(
                "(:type :event :event :grid-rebuilt :generation {} :count {})",
                generation, count
            ),
            Self::Phrase { text } => {
                format!("(:type :event :event :phrase :text {})", quote(text))
            }
        }
    }
}

/// Why a request was not acted on.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    WrongMode {
        required: InputMethod,
        active: InputMethod,
    },
    NoTarget(usize),
    NoHighlight,
    EmptyPhrase,
    InvalidGeometry,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongMode { required, active } => write!(
                f,
                "requires {} mode (active: {})",
                required.as_str(),
                active.as_str()
            ),
            Self::NoTarget(index) => write!(f, "no enabled target at index {index}"),
            Self::NoHighlight => write!(f, "no target highlighted"),
            Self::EmptyPhrase => write!(f, "phrase is empty"),
            Self::InvalidGeometry => write!(f, "grid bounds must be finite with positive size"),
        }
    }
}

// ── Controller ──────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PhraseEntry {
    label: String,
    method: InputMethod,
    /// Daemon clock at selection time.
    at_ms: f64,
}

pub struct Controller {
    mode: InputMethod,
    board: Board,
    dwell: DwellSelector,
    scanner: SwitchScanner,
    tracker: MethodTracker,
    thresholds: AffectThresholds,
    latency: NominalLatency,
    viewport_width: f64,
    viewport_height: f64,
    undo_error_window_ms: f64,
    affect: AffectLabel,
    directive: AdaptationDirective,
    /// Whether a classification has been published this session.
    affect_published: bool,
    phrase: Vec<PhraseEntry>,
    hover: Option<usize>,
}

impl Controller {
    pub fn new(config: &AacConfig) -> Self {
        let bounds = Rect::new(0.0, 0.0, config.viewport_width, config.viewport_height);
        Self {
            mode: InputMethod::Touch,
            board: Board::new(config.board.clone(), bounds, config.grid_columns),
            dwell: DwellSelector::new(config.dwell.clone()),
            scanner: SwitchScanner::default(),
            tracker: MethodTracker::new(config.tracker_window),
            thresholds: config.affect.clone(),
            latency: config.latency.clone(),
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            undo_error_window_ms: config.undo_error_window_ms,
            affect: AffectLabel::unknown(),
            directive: AdaptationDirective::default(),
            affect_published: false,
            phrase: Vec::new(),
            hover: None,
        }
    }

    pub fn mode(&self) -> InputMethod {
        self.mode
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn dwell(&self) -> &DwellSelector {
        &self.dwell
    }

    pub fn tracker(&self) -> &MethodTracker {
        &self.tracker
    }

    pub fn affect(&self) -> AffectLabel {
        self.affect
    }

    pub fn directive(&self) -> AdaptationDirective {
        self.directive
    }

    pub fn hover(&self) -> Option<usize> {
        self.hover
    }

    /// Switch the active input method, tearing down all dwell streams.
    pub fn set_mode(&mut self, mode: InputMethod) -> Vec<ControllerEvent> {
        if mode == self.mode {
            return Vec::new();
        }
        let from = self.mode;
        self.mode = mode;
        self.dwell.teardown();
        self.scanner.reset();
        self.hover = None;
        info!("Input mode set to {} (was {})", mode.as_str(), from.as_str());
        vec![
            ControllerEvent::ModeChanged { from, to: mode },
            ControllerEvent::Hover { index: None },
        ]
    }

    // ── Input ───────────────────────────────────────────────

    /// Feed one gaze/pointer sample.  Ignored outside eye mode.
    pub fn on_point_sample(
        &mut self,
        stream_id: u64,
        sample: PointSample,
        space: SampleSpace,
        now_ms: f64,
        effects: &mut dyn SideEffects,
    ) -> Vec<ControllerEvent> {
        if self.mode != InputMethod::Eye {
            trace!(stream_id, mode = self.mode.as_str(), "sample ignored outside eye mode");
            return Vec::new();
        }
        let sample = match space {
            SampleSpace::Absolute => sample,
            SampleSpace::Normalized => PointSample::new(
                sample.x * self.viewport_width,
                sample.y * self.viewport_height,
                sample.timestamp_ms,
            ),
        };

        let selection = self.dwell.on_sample(stream_id, &sample, self.board.snapshot());

        let mut events = Vec::new();
        let hover = self.dwell.hover_index(stream_id);
        if hover != self.hover {
            self.hover = hover;
            events.push(ControllerEvent::Hover { index: hover });
        }
        if let Some(sel) = selection {
            events.extend(self.commit(InputMethod::Eye, sel.index, sel.dwell_ms, now_ms, effects));
        }
        events
    }

    /// A gaze/pointer stream went away.
    pub fn end_stream(&mut self, stream_id: u64) -> Vec<ControllerEvent> {
        if !self.dwell.end_stream(stream_id) {
            return Vec::new();
        }
        debug!(stream_id, "dwell stream ended");
        match self.hover.take() {
            Some(_) => vec![ControllerEvent::Hover { index: None }],
            None => Vec::new(),
        }
    }

    /// Direct activation of a target.  Honoured in every mode and recorded
    /// against the active mode, with its nominal latency when no duration
    /// was measured.
    pub fn activate(
        &mut self,
        index: usize,
        duration_ms: Option<f64>,
        now_ms: f64,
        effects: &mut dyn SideEffects,
    ) -> Result<Vec<ControllerEvent>, Rejection> {
        if !matches!(self.board.snapshot().target(index), Some(t) if t.enabled) {
            return Err(Rejection::NoTarget(index));
        }
        let duration = duration_ms
            .filter(|d| d.is_finite() && *d >= 0.0)
            .unwrap_or_else(|| self.latency.for_method(self.mode));
        Ok(self.commit(self.mode, index, duration, now_ms, effects))
    }

    /// Step the scan highlight.  Only in switches mode.
    pub fn switch_next(&mut self) -> Result<Vec<ControllerEvent>, Rejection> {
        self.require_mode(InputMethod::Switches)?;
        let cursor = self.scanner.next(self.board.snapshot());
        self.hover = cursor;
        Ok(vec![ControllerEvent::Hover { index: cursor }])
    }

    /// Select the highlighted target.  Only in switches mode.
    pub fn switch_select(
        &mut self,
        now_ms: f64,
        effects: &mut dyn SideEffects,
    ) -> Result<Vec<ControllerEvent>, Rejection> {
        self.require_mode(InputMethod::Switches)?;
        let index = self
            .scanner
            .select(self.board.snapshot())
            .ok_or(Rejection::NoHighlight)?;
        let duration = self.latency.for_method(InputMethod::Switches);
        Ok(self.commit(InputMethod::Switches, index, duration, now_ms, effects))
    }

    fn require_mode(&self, required: InputMethod) -> Result<(), Rejection> {
        if self.mode == required {
            Ok(())
        } else {
            Err(Rejection::WrongMode {
                required,
                active: self.mode,
            })
        }
    }

    /// Apply a confirmed selection: phrase, tracker, speech, telemetry.
    fn commit(
        &mut self,
        method: InputMethod,
        index: usize,
        duration_ms: f64,
        now_ms: f64,
        effects: &mut dyn SideEffects,
    ) -> Vec<ControllerEvent> {
        let Some(label) = self.board.snapshot().target(index).map(|t| t.label.clone()) else {
            return Vec::new();
        };
        self.phrase.push(PhraseEntry {
            label: label.clone(),
            method,
            at_ms: now_ms,
        });
        let best = self.tracker.record(method, duration_ms, false);
        info!(method = method.as_str(), index, label = %label, "selection");

        let sample = PerformanceSample {
            method,
            duration_ms,
            errored: false,
            best,
        };
        if let Err(e) = effects.report(&sample) {
            debug!("telemetry report failed: {e:#}");
        }
        if let Err(e) = effects.speak(&label) {
            debug!("speech request failed: {e:#}");
        }

        vec![
            ControllerEvent::Selected {
                method,
                index,
                label,
            },
            ControllerEvent::Phrase {
                text: self.phrase_text(),
            },
            ControllerEvent::BestMethod(best),
        ]
    }

    // ── Affect ──────────────────────────────────────────────

    /// Classify a new expression vector and adapt.
    pub fn on_expression(&mut self, vector: &ExpressionVector) -> Vec<ControllerEvent> {
        let label = classify(vector, &self.thresholds);
        trace!(label = label.kind.as_str(), score = label.score, "expression classified");
        self.publish_affect(label)
    }

    /// The expression source is gone; fall back to `unknown`.
    pub fn on_expression_unavailable(&mut self) -> Vec<ControllerEvent> {
        debug!("expression source unavailable");
        self.publish_affect(AffectLabel::unknown())
    }

    fn publish_affect(&mut self, label: AffectLabel) -> Vec<ControllerEvent> {
        let directive = adapt(&label, self.mode);
        let first = !self.affect_published;
        let mut events = Vec::new();

        if first || label.kind != self.affect.kind {
            events.push(ControllerEvent::Affect(label));
        }
        if first || directive != self.directive {
            if !first {
                info!(
                    layout = directive.layout.as_str(),
                    rate = directive.rate_hint.as_str(),
                    affect = label.kind.as_str(),
                    "adaptation changed"
                );
            }
            events.push(ControllerEvent::Adaptation(directive));
        }

        self.affect = label;
        self.directive = directive;
        self.affect_published = true;
        events
    }

    // ── Board ───────────────────────────────────────────────

    pub fn set_board(&mut self, labels: Vec<String>) -> Vec<ControllerEvent> {
        self.board.set_labels(labels);
        self.grid_changed()
    }

    pub fn set_geometry(
        &mut self,
        bounds: Rect,
        cols: Option<usize>,
    ) -> Result<Vec<ControllerEvent>, Rejection> {
        if !bounds.is_valid() || cols == Some(0) {
            return Err(Rejection::InvalidGeometry);
        }
        let cols = cols.unwrap_or(self.board.cols());
        self.board.set_geometry(bounds, cols);
        Ok(self.grid_changed())
    }

    pub fn block_word(&mut self, word: &str) -> Vec<ControllerEvent> {
        if self.board.block(word) {
            self.grid_changed()
        } else {
            Vec::new()
        }
    }

    pub fn unblock_word(&mut self, word: &str) -> Vec<ControllerEvent> {
        if self.board.unblock(word) {
            self.grid_changed()
        } else {
            Vec::new()
        }
    }

    pub fn set_blocklist(&mut self, words: &[String]) -> Vec<ControllerEvent> {
        if self.board.set_blocklist(words) {
            self.grid_changed()
        } else {
            Vec::new()
        }
    }

    /// Drop every positional reference into the old grid.
    fn grid_changed(&mut self) -> Vec<ControllerEvent> {
        self.dwell.invalidate();
        self.scanner.reset();
        let grid = self.board.snapshot();
        let mut events = vec![ControllerEvent::GridRebuilt {
            generation: grid.generation,
            count: grid.len(),
        }];
        if self.hover.take().is_some() {
            events.push(ControllerEvent::Hover { index: None });
        }
        events
    }

    // ── Phrase ──────────────────────────────────────────────

    /// Composed phrase, space separated.
    pub fn phrase_text(&self) -> String {
        self.phrase
            .iter()
            .map(|e| e.label.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn clear_phrase(&mut self) -> Vec<ControllerEvent> {
        self.phrase.clear();
        vec![ControllerEvent::Phrase {
            text: String::new(),
        }]
    }

    /// Remove the last word.  Undoing a recent selection counts it as an
    /// error for the method that made it.
    pub fn undo(&mut self, now_ms: f64) -> Result<Vec<ControllerEvent>, Rejection> {
        let entry = self.phrase.pop().ok_or(Rejection::EmptyPhrase)?;
        let mut events = vec![ControllerEvent::Phrase {
            text: self.phrase_text(),
        }];
        if now_ms - entry.at_ms < self.undo_error_window_ms
            && self.tracker.mark_last_error(entry.method)
        {
            debug!(method = entry.method.as_str(), label = %entry.label, "undo counted as error");
            events.push(ControllerEvent::BestMethod(self.tracker.best_method()));
        }
        Ok(events)
    }

    // ── Tracker ─────────────────────────────────────────────

    pub fn reset_methods(&mut self) -> Vec<ControllerEvent> {
        self.tracker.reset();
        vec![ControllerEvent::BestMethod(self.tracker.best_method())]
    }

    // ── Configuration ───────────────────────────────────────

    /// Adopt a new configuration, rebuilding the grid if its layout changed.
    pub fn apply_config(&mut self, config: &AacConfig) -> Vec<ControllerEvent> {
        if self.dwell.config.threshold_ms != config.dwell.threshold_ms {
            self.dwell.set_threshold(config.dwell.threshold_ms);
        }
        self.dwell.config.suppression_ms = config.dwell.suppression_ms;
        self.thresholds = config.affect.clone();
        self.latency = config.latency.clone();
        self.undo_error_window_ms = config.undo_error_window_ms;
        self.viewport_width = config.viewport_width;
        self.viewport_height = config.viewport_height;
        if self.tracker.window() != config.tracker_window {
            self.tracker.set_window(config.tracker_window);
        }

        let mut events = Vec::new();
        if self.board.cols() != config.grid_columns {
            self.board.set_geometry(self.board.bounds(), config.grid_columns);
            events.extend(self.grid_changed());
        }
        let labels = normalize_labels(&config.board);
        if self.board.labels() != labels.as_slice() {
            events.extend(self.set_board(labels));
        }
        events
    }

    // ── Status ──────────────────────────────────────────────

    pub fn mode_status_sexp(&self) -> String {
        format!(
            "(:mode :{} :hover {} :dwell {})",
            self.mode.as_str(),
            self.hover
                .map(|i| i.to_string())
                .unwrap_or_else(|| "nil".to_string()),
            self.dwell.status_sexp()
        )
    }

    pub fn phrase_sexp(&self) -> String {
        let words: Vec<String> = self.phrase.iter().map(|e| quote(&e.label)).collect();
        format!(
            "(:text {} :words ({}))",
            quote(&self.phrase_text()),
            words.join(" ")
        )
    }

    pub fn affect_sexp(&self) -> String {
        format!(
            "(:affect {} :adaptation {} :available {})",
            self.affect.to_sexp(),
            self.directive.to_sexp(),
            if self.affect.kind == AffectKind::Unknown {
                "nil"
            } else {
                "t"
            }
        )
    }

    pub fn blocklist_sexp(&self) -> String {
        let words: Vec<String> = self.board.blocklist().map(quote).collect();
        format!("({})", words.join(" "))
    }
}

// ── Tests ───────────────────────────────────────────────────
