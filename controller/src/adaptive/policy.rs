//! Affect-driven UI adaptation policy.

use super::affect::{AffectKind, AffectLabel};
use super::method_tracker::InputMethod;

/// Board layout density requested from the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Simplified,
    Normal,
}

impl Layout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simplified => "simplified",
            Self::Normal => "normal",
        }
    }
}

/// Output pacing requested from the UI/speech layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateHint {
    Slower,
    Normal,
}

impl RateHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slower => "slower",
            Self::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptationDirective {
    pub layout: Layout,
    pub rate_hint: RateHint,
}

impl Default for AdaptationDirective {
    fn default() -> Self {
        Self {
            layout: Layout::Normal,
            rate_hint: RateHint::Normal,
        }
    }
}

impl AdaptationDirective {
    pub fn to_sexp(&self) -> String {
        format!(
            "(:layout :{} :rate :{})",
            self.layout.as_str(),
            self.rate_hint.as_str()
        )
    }
}

/// Simplify and slow down for distressed or tired users.  Neither the
/// score nor the active method alters the result.
pub fn adapt(affect: &AffectLabel, _active_method: InputMethod) -> AdaptationDirective {
    match affect.kind {
        AffectKind::Sadness | AffectKind::Anger | AffectKind::Tired => AdaptationDirective {
            layout: Layout::Simplified,
            rate_hint: RateHint::Slower,
        },
        _ => AdaptationDirective::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(kind: AffectKind) -> AffectLabel {
        AffectLabel::new(kind, 0.7)
    }

    #[test]
    fn test_distress_simplifies_for_every_method() {
        for kind in [AffectKind::Sadness, AffectKind::Anger, AffectKind::Tired] {
            for method in InputMethod::ALL {
                let d = adapt(&label(kind), method);
                assert_eq!(d.layout, Layout::Simplified);
                assert_eq!(d.rate_hint, RateHint::Slower);
            }
        }
    }

    #[test]
    fn test_other_labels_are_normal() {
        for kind in [AffectKind::Happiness, AffectKind::Neutral, AffectKind::Unknown] {
            assert_eq!(adapt(&label(kind), InputMethod::Eye), AdaptationDirective::default());
        }
    }

    #[test]
    fn test_score_does_not_matter() {
        let low = AffectLabel::new(AffectKind::Sadness, 0.01);
        assert_eq!(adapt(&low, InputMethod::Touch).layout, Layout::Simplified);
    }

    #[test]
    fn test_sexp() {
        let d = adapt(&label(AffectKind::Tired), InputMethod::Eye);
        assert_eq!(d.to_sexp(), "(:layout :simplified :rate :slower)");
    }
}
