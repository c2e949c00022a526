use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Funnel {
    Upper,
    Mid,
    Lower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AngleKind {
    Promotional,
    Emotional,
    Rational,
    Urgency,
    Trust,
    SocialProof,
    Scarcity,
    BenefitFocused,
    FeatureFocused,
    Aspirational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AngleAssignment {
    pub kind: AngleKind,
    pub confidence: f64,
}

/// Set when an ad produced no angle with confidence above the configured
/// floor; the ad is retained (never dropped) but flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AngleComplexity {
    Normal,
    NoAnglesDetected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategicLabel {
    pub ad_id: String,
    pub funnel: Funnel,
    pub angles: Vec<AngleAssignment>,
    pub angle_complexity: AngleComplexity,
    pub persona: Option<String>,
    pub topics: BTreeSet<String>,
    pub urgency_score: f64,
    pub promotional_intensity: f64,
    pub brand_voice_score: f64,
    /// Set when a numeric field returned out of [0,1] and was nulled out by
    /// the labeling stage's defensive clamp.
    pub labeling_degraded: bool,
}

impl StrategicLabel {
    /// Applies the angle-confidence floor and flags the ad if nothing
    /// survives, per spec: "if the resulting set is empty, the ad is
    /// retained but flagged."
    pub fn finalize_angles(mut raw_angles: Vec<AngleAssignment>, floor: f64) -> (Vec<AngleAssignment>, AngleComplexity) {
        raw_angles.retain(|a| a.confidence >= floor);
        if raw_angles.is_empty() {
            (raw_angles, AngleComplexity::NoAnglesDetected)
        } else {
            (raw_angles, AngleComplexity::Normal)
        }
    }

    pub fn clamp_unit(value: f64) -> Option<f64> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Some(value)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_angle_set_is_flagged() {
        let (angles, complexity) = StrategicLabel::finalize_angles(
            vec![AngleAssignment { kind: AngleKind::Urgency, confidence: 0.2 }],
            0.5,
        );
        assert!(angles.is_empty());
        assert_eq!(complexity, AngleComplexity::NoAnglesDetected);
    }

    #[test]
    fn angles_above_floor_are_kept() {
        let (angles, complexity) = StrategicLabel::finalize_angles(
            vec![
                AngleAssignment { kind: AngleKind::Urgency, confidence: 0.9 },
                AngleAssignment { kind: AngleKind::Trust, confidence: 0.3 },
            ],
            0.5,
        );
        assert_eq!(angles.len(), 1);
        assert_eq!(complexity, AngleComplexity::Normal);
    }

    #[test]
    fn clamp_unit_rejects_out_of_range() {
        assert_eq!(StrategicLabel::clamp_unit(0.5), Some(0.5));
        assert_eq!(StrategicLabel::clamp_unit(1.5), None);
        assert_eq!(StrategicLabel::clamp_unit(f64::NAN), None);
    }
}
