//! Daemon configuration: dwell timing, affect thresholds, grid geometry,
//! nominal method latencies, and the speech command.
//!
//! Loaded from an optional s-expression plist file at startup and
//! adjustable key-by-key over IPC (`config-set`).  Both paths go through
//! [`AacConfig::apply`], so validation is shared.

use std::path::Path;

use anyhow::{bail, Context};
use lexpr::Value;
use tracing::info;

use crate::adaptive::affect::AffectThresholds;
use crate::adaptive::dwell::DwellConfig;
use crate::adaptive::grid::{normalize_labels, DEFAULT_BOARD, DEFAULT_COLUMNS};
use crate::adaptive::method_tracker::{InputMethod, DEFAULT_WINDOW};
use crate::ipc::plist;

// ── Nominal latency ─────────────────────────────────────────

/// Durations recorded for a selection when no measured timing exists.
#[derive(Debug, Clone, PartialEq)]
pub struct NominalLatency {
    pub touch_ms: f64,
    pub switches_ms: f64,
    /// Higher than touch to reflect dwell overhead.
    pub eye_ms: f64,
}

impl Default for NominalLatency {
    fn default() -> Self {
        Self {
            touch_ms: 700.0,
            switches_ms: 700.0,
            eye_ms: 900.0,
        }
    }
}

impl NominalLatency {
    pub fn for_method(&self, method: InputMethod) -> f64 {
        match method {
            InputMethod::Touch => self.touch_ms,
            InputMethod::Switches => self.switches_ms,
            InputMethod::Eye => self.eye_ms,
        }
    }
}

// ── AacConfig ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AacConfig {
    pub dwell: DwellConfig,
    pub affect: AffectThresholds,
    pub latency: NominalLatency,
    /// Samples kept per input method (0 = unbounded).
    pub tracker_window: usize,
    /// An undo this soon after a selection counts against its method.
    pub undo_error_window_ms: f64,
    /// Viewport used to scale normalized gaze coordinates.
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub grid_columns: usize,
    pub board: Vec<String>,
    /// External program spawned with each spoken label.
    pub speech_command: Option<String>,
}

impl Default for AacConfig {
    fn default() -> Self {
        Self {
            dwell: DwellConfig::default(),
            affect: AffectThresholds::default(),
            latency: NominalLatency::default(),
            tracker_window: DEFAULT_WINDOW,
            undo_error_window_ms: 3000.0,
            viewport_width: 1920.0,
            viewport_height: 1080.0,
            grid_columns: DEFAULT_COLUMNS,
            board: DEFAULT_BOARD.iter().map(|s| s.to_string()).collect(),
            speech_command: None,
        }
    }
}

fn number_in(key: &str, value: &Value, min: f64, max: f64) -> anyhow::Result<f64> {
    let text = plist::value_text(value);
    let n: f64 = text
        .parse()
        .with_context(|| format!(":{key} expects a number, got {text}"))?;
    if !n.is_finite() || n < min || n > max {
        bail!(":{key} out of range ({min}-{max}): {n}");
    }
    Ok(n)
}

fn count_in(key: &str, value: &Value, min: usize, max: usize) -> anyhow::Result<usize> {
    let n = number_in(key, value, min as f64, max as f64)?;
    if n.fract() != 0.0 {
        bail!(":{key} expects an integer, got {n}");
    }
    Ok(n as usize)
}

impl AacConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config =
            Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse a plist such as `(:dwell-threshold-ms 1500 :grid-columns 3)`.
    /// Unspecified keys keep their defaults.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let value = lexpr::from_str(text).context("malformed s-expression")?;
        if !matches!(value, Value::Cons(_) | Value::Null | Value::Nil) {
            bail!("config must be a property list");
        }
        let mut config = Self::default();
        for (key, val) in plist::entries(&value) {
            config.apply(&key, val)?;
        }
        Ok(config)
    }

    /// Validate and apply one key.
    pub fn apply(&mut self, key: &str, value: &Value) -> anyhow::Result<()> {
        match key {
            "dwell-threshold-ms" => self.dwell.threshold_ms = number_in(key, value, 100.0, 10_000.0)?,
            "suppression-ms" => self.dwell.suppression_ms = number_in(key, value, 0.0, 1e9)?,
            "smile-threshold" => self.affect.smile = number_in(key, value, 0.0, 1.0)?,
            "brow-down-threshold" => self.affect.brow_down = number_in(key, value, 0.0, 1.0)?,
            "anger-frown-threshold" => self.affect.anger_frown = number_in(key, value, 0.0, 1.0)?,
            "mouth-frown-threshold" => self.affect.mouth_frown = number_in(key, value, 0.0, 1.0)?,
            "sadness-smile-ceiling" => {
                self.affect.sadness_smile_ceiling = number_in(key, value, 0.0, 1.0)?
            }
            "eye-blink-threshold" => self.affect.eye_blink = number_in(key, value, 0.0, 1.0)?,
            "touch-latency-ms" => self.latency.touch_ms = number_in(key, value, 0.0, 60_000.0)?,
            "switches-latency-ms" => {
                self.latency.switches_ms = number_in(key, value, 0.0, 60_000.0)?
            }
            "eye-latency-ms" => self.latency.eye_ms = number_in(key, value, 0.0, 60_000.0)?,
            "tracker-window" => self.tracker_window = count_in(key, value, 0, 100_000)?,
            "undo-error-window-ms" => {
                self.undo_error_window_ms = number_in(key, value, 0.0, 600_000.0)?
            }
            "viewport-width" => self.viewport_width = number_in(key, value, 1.0, 100_000.0)?,
            "viewport-height" => self.viewport_height = number_in(key, value, 1.0, 100_000.0)?,
            "grid-columns" => self.grid_columns = count_in(key, value, 1, 64)?,
            "board" => {
                let labels = plist::list_texts(value)
                    .with_context(|| format!(":{key} expects a list of labels"))?;
                self.board = normalize_labels(labels);
            }
            "speech-command" => {
                let cmd = plist::value_text(value);
                self.speech_command = (cmd != "nil" && !cmd.trim().is_empty()).then_some(cmd);
            }
            other => bail!("unknown config key :{other}"),
        }
        Ok(())
    }

    /// IPC s-expression of the full configuration.
    pub fn to_sexp(&self) -> String {
        let board: Vec<String> = self.board.iter().map(|l| plist::quote(l)).collect();
        format!(
            "(:dwell-threshold-ms {} :suppression-ms {} :smile-threshold {} :brow-down-threshold {} :anger-frown-threshold {} :mouth-frown-threshold {} :sadness-smile-ceiling {} :eye-blink-threshold {} :touch-latency-ms {} :switches-latency-ms {} :eye-latency-ms {} :tracker-window {} :undo-error-window-ms {} :viewport-width {} :viewport-height {} :grid-columns {} :speech-command {} :board ({}))",
            self.dwell.threshold_ms,
            self.dwell.suppression_ms,
            self.affect.smile,
            self.affect.brow_down,
            self.affect.anger_frown,
            self.affect.mouth_frown,
            self.affect.sadness_smile_ceiling,
            self.affect.eye_blink,
            self.latency.touch_ms,
            self.latency.switches_ms,
            self.latency.eye_ms,
            self.tracker_window,
            self.undo_error_window_ms,
            self.viewport_width,
            self.viewport_height,
            self.grid_columns,
            self.speech_command
                .as_deref()
                .map(plist::quote)
                .unwrap_or_else(|| "nil".to_string()),
            board.join(" "),
        )
    }
}
