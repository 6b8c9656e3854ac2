//! Input-method performance tracking and best-method recommendation.
//!
//! Each selection contributes a sample (duration, errored) to its input
//! method.  A method's score is its average duration inflated by its error
//! rate; the lowest score wins, with ties going to touch, then switches,
//! then eye.  Methods without samples never take part in the comparison.

use std::collections::VecDeque;
use tracing::debug;

/// Default number of samples kept per method.
pub const DEFAULT_WINDOW: usize = 100;

// ── InputMethod ─────────────────────────────────────────────

/// Input modality used to make a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputMethod {
    Touch,
    Switches,
    Eye,
}

impl InputMethod {
    /// All methods in tie-break priority order.
    pub const ALL: [Self; 3] = [Self::Touch, Self::Switches, Self::Eye];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Touch => "touch",
            Self::Switches => "switches",
            Self::Eye => "eye",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "touch" => Some(Self::Touch),
            "switches" | "switch" => Some(Self::Switches),
            "eye" | "gaze" => Some(Self::Eye),
            _ => None,
        }
    }

    fn slot(&self) -> usize {
        match self {
            Self::Touch => 0,
            Self::Switches => 1,
            Self::Eye => 2,
        }
    }
}

// ── MethodStats ─────────────────────────────────────────────

/// Running totals for one method.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MethodStats {
    pub sample_count: u64,
    pub total_duration_ms: f64,
    pub error_count: u64,
}

impl MethodStats {
    pub fn avg_duration_ms(&self) -> Option<f64> {
        (self.sample_count > 0).then(|| self.total_duration_ms / self.sample_count as f64)
    }

    pub fn error_rate(&self) -> Option<f64> {
        (self.sample_count > 0).then(|| self.error_count as f64 / self.sample_count as f64)
    }

    /// `avg_duration * (1 + error_rate)`; `None` without samples.
    pub fn score(&self) -> Option<f64> {
        Some(self.avg_duration_ms()? * (1.0 + self.error_rate()?))
    }
}

#[derive(Debug, Clone, Copy)]
struct MethodSample {
    duration_ms: f64,
    errored: bool,
}

// ── MethodTracker ───────────────────────────────────────────

/// Per-method sample windows with running totals.
#[derive(Debug, Clone)]
pub struct MethodTracker {
    /// Maximum samples kept per method (0 = unbounded).
    window: usize,
    samples: [VecDeque<MethodSample>; 3],
    stats: [MethodStats; 3],
}

impl Default for MethodTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl MethodTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            samples: Default::default(),
            stats: [MethodStats::default(); 3],
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Change the window size, evicting the oldest samples if needed.
    pub fn set_window(&mut self, window: usize) {
        self.window = window;
        for method in InputMethod::ALL {
            self.evict(method);
        }
    }

    /// Record one selection and return the resulting best method.
    pub fn record(&mut self, method: InputMethod, duration_ms: f64, errored: bool) -> InputMethod {
        let duration_ms = if duration_ms.is_finite() {
            duration_ms.max(0.0)
        } else {
            0.0
        };

        let slot = method.slot();
        self.samples[slot].push_back(MethodSample {
            duration_ms,
            errored,
        });
        let stats = &mut self.stats[slot];
        stats.sample_count += 1;
        stats.total_duration_ms += duration_ms;
        if errored {
            stats.error_count += 1;
        }
        self.evict(method);

        let best = self.best_method();
        debug!(
            method = method.as_str(),
            duration_ms,
            errored,
            best = best.as_str(),
            "method sample recorded"
        );
        best
    }

    /// Flag the most recent non-errored sample of `method` as errored.
    /// Returns false if every kept sample is already errored.
    pub fn mark_last_error(&mut self, method: InputMethod) -> bool {
        let slot = method.slot();
        match self.samples[slot].iter_mut().rev().find(|s| !s.errored) {
            Some(sample) => {
                sample.errored = true;
                self.stats[slot].error_count += 1;
                debug!(method = method.as_str(), "selection marked as error");
                true
            }
            None => false,
        }
    }

    fn evict(&mut self, method: InputMethod) {
        if self.window == 0 {
            return;
        }
        let slot = method.slot();
        while self.samples[slot].len() > self.window {
            let Some(old) = self.samples[slot].pop_front() else {
                break;
            };
            let stats = &mut self.stats[slot];
            stats.sample_count -= 1;
            stats.total_duration_ms = (stats.total_duration_ms - old.duration_ms).max(0.0);
            if old.errored {
                stats.error_count -= 1;
            }
        }
    }

    pub fn stats(&self, method: InputMethod) -> MethodStats {
        self.stats[method.slot()]
    }

    pub fn score(&self, method: InputMethod) -> Option<f64> {
        self.stats(method).score()
    }

    /// Lowest-scoring method with samples; touch when nothing is recorded.
    pub fn best_method(&self) -> InputMethod {
        let mut best: Option<(InputMethod, f64)> = None;
        for method in InputMethod::ALL {
            let Some(score) = self.score(method) else {
                continue;
            };
            match best {
                Some((_, best_score)) if score >= best_score => {}
                _ => best = Some((method, score)),
            }
        }
        best.map(|(m, _)| m).unwrap_or(InputMethod::Touch)
    }

    pub fn reset(&mut self) {
        for slot in 0..3 {
            self.samples[slot].clear();
            self.stats[slot] = MethodStats::default();
        }
        debug!("method tracker reset");
    }

    /// IPC status s-expression with per-method stats and the recommendation.
    pub fn status_sexp(&self) -> String {
        let mut methods = String::from("(");
        for method in InputMethod::ALL {
            let s = self.stats(method);
            let score = s
                .score()
                .map(|v| format!("{:.1}", v))
                .unwrap_or_else(|| "nil".to_string());
            methods.push_str(&format!(
                "(:method :{} :samples {} :errors {} :avg-ms {:.1} :score {})",
                method.as_str(),
                s.sample_count,
                s.error_count,
                s.avg_duration_ms().unwrap_or(0.0),
                score,
            ));
        }
        methods.push(')');
        format!(
            "(:best :{} :window {} :methods {})",
            self.best_method().as_str(),
            self.window,
            methods
        )
    }
}

// ── Tests ───────────────────────────────────────────────────
