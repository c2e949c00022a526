use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisualTextAlignment {
    Aligned,
    Misaligned,
    Contradictory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisualFatigueRisk {
    Low,
    Medium,
    High,
}

/// Which attempt in the fallback chain (primary URI -> backup URI ->
/// text-only) produced this ad's visual intelligence row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualSourceOutcome {
    PrimaryUri,
    BackupUri,
    TextOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualIntelligence {
    pub ad_id: String,
    pub visual_text_alignment: VisualTextAlignment,
    pub visual_style: String,
    pub visual_focus: String,
    pub brand_consistency: f64,
    pub creative_fatigue_risk: VisualFatigueRisk,
    pub differentiation: f64,
    pub source_outcome: VisualSourceOutcome,
    pub visual_unavailable: bool,
}

/// Per-ad multi-factor sampling score used to rank candidates for the visual
/// intelligence budget. Not persisted on its own; used transiently by the
/// visual stage to pick the sampled subset.
#[derive(Debug, Clone, Copy)]
pub struct SamplingScore {
    pub ad_id_index: usize,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_serialize_round_trip() {
        let vi = VisualIntelligence {
            ad_id: "ad1".into(),
            visual_text_alignment: VisualTextAlignment::Aligned,
            visual_style: "minimalist".into(),
            visual_focus: "product".into(),
            brand_consistency: 0.8,
            creative_fatigue_risk: VisualFatigueRisk::Low,
            differentiation: 0.6,
            source_outcome: VisualSourceOutcome::PrimaryUri,
            visual_unavailable: false,
        };
        let json = serde_json::to_string(&vi).unwrap();
        let back: VisualIntelligence = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ad_id, "ad1");
    }
}
