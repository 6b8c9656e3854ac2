//! Affect classification from facial-expression channel intensities.
//!
//! Averages symmetric left/right channels and evaluates a fixed-priority
//! rule list.  The first matching rule wins, so a strong smile is reported
//! as happiness even when the anger rule would also fire.
//! Pure and deterministic; frame cadence is owned by the sensor source.

use std::collections::HashMap;

// ── ExpressionChannel ───────────────────────────────────────

/// Named facial-expression channel (blendshape) consumed by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionChannel {
    SmileLeft,
    SmileRight,
    BrowDownLeft,
    BrowDownRight,
    EyeBlinkLeft,
    EyeBlinkRight,
    MouthFrownLeft,
    MouthFrownRight,
}

impl ExpressionChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SmileLeft => "smile-left",
            Self::SmileRight => "smile-right",
            Self::BrowDownLeft => "brow-down-left",
            Self::BrowDownRight => "brow-down-right",
            Self::EyeBlinkLeft => "eye-blink-left",
            Self::EyeBlinkRight => "eye-blink-right",
            Self::MouthFrownLeft => "mouth-frown-left",
            Self::MouthFrownRight => "mouth-frown-right",
        }
    }

    /// Parse either the kebab-case IPC name or the face tracker's
    /// camelCase blendshape name (`mouthSmileLeft`, `browDownRight`, ...).
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "smile-left" | "mouth-smile-left" | "mouthSmileLeft" => Some(Self::SmileLeft),
            "smile-right" | "mouth-smile-right" | "mouthSmileRight" => Some(Self::SmileRight),
            "brow-down-left" | "browDownLeft" => Some(Self::BrowDownLeft),
            "brow-down-right" | "browDownRight" => Some(Self::BrowDownRight),
            "eye-blink-left" | "blink-left" | "eyeBlinkLeft" => Some(Self::EyeBlinkLeft),
            "eye-blink-right" | "blink-right" | "eyeBlinkRight" => Some(Self::EyeBlinkRight),
            "mouth-frown-left" | "frown-left" | "mouthFrownLeft" => Some(Self::MouthFrownLeft),
            "mouth-frown-right" | "frown-right" | "mouthFrownRight" => Some(Self::MouthFrownRight),
            _ => None,
        }
    }
}

// ── ExpressionVector ────────────────────────────────────────

/// Per-frame expression intensities in [0, 1].  Missing channels read as 0.
///
/// `reported` counts every channel the frame carried, recognised or not;
/// a frame is empty only when the tracker reported nothing at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionVector {
    channels: HashMap<ExpressionChannel, f64>,
    reported: usize,
}

impl ExpressionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, intensity)` pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut vector = Self::new();
        for (name, value) in pairs {
            vector.record(name, value);
        }
        vector
    }

    /// Record one channel reported by the tracker.  Names the classifier
    /// does not use still mark the frame as present.
    pub fn record(&mut self, name: &str, value: f64) {
        self.reported += 1;
        if let Some(channel) = ExpressionChannel::from_str(name) {
            self.set(channel, value);
        }
    }

    /// Set a channel intensity.  Non-finite values are ignored; others are
    /// clamped into [0, 1].
    pub fn set(&mut self, channel: ExpressionChannel, value: f64) {
        if value.is_finite() {
            self.channels.insert(channel, value.clamp(0.0, 1.0));
        }
    }

    pub fn get(&self, channel: ExpressionChannel) -> f64 {
        self.channels.get(&channel).copied().unwrap_or(0.0)
    }

    /// True when the frame carried no channels.
    pub fn is_empty(&self) -> bool {
        self.reported == 0 && self.channels.is_empty()
    }

    fn avg(&self, a: ExpressionChannel, b: ExpressionChannel) -> f64 {
        (self.get(a) + self.get(b)) / 2.0
    }
}

// ── AffectKind / AffectLabel ────────────────────────────────

/// Discrete emotional-state classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffectKind {
    Happiness,
    Anger,
    Sadness,
    Tired,
    Neutral,
    Unknown,
}

impl AffectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Happiness => "happiness",
            Self::Anger => "anger",
            Self::Sadness => "sadness",
            Self::Tired => "tired",
            Self::Neutral => "neutral",
            Self::Unknown => "unknown",
        }
    }
}

/// Affect label with the score that triggered it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffectLabel {
    pub kind: AffectKind,
    pub score: f64,
}

impl AffectLabel {
    pub fn new(kind: AffectKind, score: f64) -> Self {
        Self { kind, score }
    }

    /// Label used when no expression data is available.
    pub fn unknown() -> Self {
        Self::new(AffectKind::Unknown, 0.0)
    }

    pub fn to_sexp(&self) -> String {
        format!("(:label :{} :score {:.3})", self.kind.as_str(), self.score)
    }
}

impl Default for AffectLabel {
    fn default() -> Self {
        Self::unknown()
    }
}

// ── Thresholds ──────────────────────────────────────────────

/// Classification thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct AffectThresholds {
    /// Smile average above which happiness is reported.
    pub smile: f64,
    /// Brow-down average above which anger may be reported.
    pub brow_down: f64,
    /// Frown average that must accompany brow-down for anger.
    pub anger_frown: f64,
    /// Frown average above which sadness may be reported.
    pub mouth_frown: f64,
    /// Smile average that must stay below this for sadness.
    pub sadness_smile_ceiling: f64,
    /// Blink average above which tiredness is reported.
    pub eye_blink: f64,
    /// Score reported with a neutral label.
    pub neutral_score: f64,
}

impl Default for AffectThresholds {
    fn default() -> Self {
        Self {
            smile: 0.6,
            brow_down: 0.5,
            anger_frown: 0.4,
            mouth_frown: 0.5,
            sadness_smile_ceiling: 0.3,
            eye_blink: 0.6,
            neutral_score: 0.5,
        }
    }
}

// ── Classifier ──────────────────────────────────────────────

/// Classify an expression vector.  An empty frame yields `unknown`; a
/// frame where no rule fires is `neutral`.
pub fn classify(vector: &ExpressionVector, t: &AffectThresholds) -> AffectLabel {
    use ExpressionChannel as C;

    if vector.is_empty() {
        return AffectLabel::unknown();
    }

    let smile = vector.avg(C::SmileLeft, C::SmileRight);
    let brow_down = vector.avg(C::BrowDownLeft, C::BrowDownRight);
    let eye_blink = vector.avg(C::EyeBlinkLeft, C::EyeBlinkRight);
    let mouth_frown = vector.avg(C::MouthFrownLeft, C::MouthFrownRight);

    if smile > t.smile {
        AffectLabel::new(AffectKind::Happiness, smile)
    } else if brow_down > t.brow_down && mouth_frown > t.anger_frown {
        AffectLabel::new(AffectKind::Anger, (brow_down + mouth_frown) / 2.0)
    } else if mouth_frown > t.mouth_frown && smile < t.sadness_smile_ceiling {
        AffectLabel::new(AffectKind::Sadness, mouth_frown)
    } else if eye_blink > t.eye_blink {
        AffectLabel::new(AffectKind::Tired, eye_blink)
    } else {
        AffectLabel::new(AffectKind::Neutral, t.neutral_score)
    }
}

// ── Tests ───────────────────────────────────────────────────
