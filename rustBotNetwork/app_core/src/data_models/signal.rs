use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Dimension {
    Competitive,
    Creative,
    Channel,
    Audience,
    Visual,
    Cta,
    Whitespace,
    Temporal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Noise,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// `score = 0.4*confidence + 0.4*impact + 0.2*actionability`, thresholded
    /// at 0.8 / 0.6 / 0.4 / 0.2. A pure function of its three inputs.
    pub fn from_components(confidence: f64, business_impact: f64, actionability: f64) -> (Self, f64) {
        let score = 0.4 * confidence + 0.4 * business_impact + 0.2 * actionability;
        let level = if score >= 0.8 {
            Severity::Critical
        } else if score >= 0.6 {
            Severity::High
        } else if score >= 0.4 {
            Severity::Medium
        } else if score >= 0.2 {
            Severity::Low
        } else {
            Severity::Noise
        };
        (level, score)
    }
}

/// A single structured insight emitted by Multi-Dimensional Intelligence,
/// deduplicated within its producing module by `(dimension, subject_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub dimension: Dimension,
    pub subject_key: String,
    pub claim: String,
    pub confidence: f64,
    pub business_impact: f64,
    pub actionability: f64,
    pub severity: Severity,
    pub severity_score: f64,
    pub supporting_refs: Vec<String>,
}

impl Signal {
    pub fn new(
        id: impl Into<String>,
        dimension: Dimension,
        subject_key: impl Into<String>,
        claim: impl Into<String>,
        confidence: f64,
        business_impact: f64,
        actionability: f64,
        supporting_refs: Vec<String>,
    ) -> Self {
        let (severity, severity_score) = Severity::from_components(confidence, business_impact, actionability);
        Self {
            id: id.into(),
            dimension,
            subject_key: subject_key.into(),
            claim: claim.into(),
            confidence,
            business_impact,
            actionability,
            severity,
            severity_score,
            supporting_refs,
        }
    }

    /// `(dimension, subject_key)` merge key used by cross-module
    /// deduplication: keep only the strongest instance per key.
    pub fn dedup_key(&self) -> (Dimension, String) {
        (self.dimension, self.subject_key.clone())
    }
}

/// Deduplicates by `(dimension, subject_key)`, keeping the highest-severity
/// instance for each key. Input order is not significant; output is sorted
/// by descending severity score then id for deterministic reruns.
pub fn dedupe_signals(signals: Vec<Signal>) -> Vec<Signal> {
    use std::collections::HashMap;
    let mut best: HashMap<(Dimension, String), Signal> = HashMap::new();
    for signal in signals {
        let key = signal.dedup_key();
        match best.get(&key) {
            Some(existing) if existing.severity_score >= signal.severity_score => {}
            _ => {
                best.insert(key, signal);
            }
        }
    }
    let mut out: Vec<Signal> = best.into_values().collect();
    out.sort_by(|a, b| {
        b.severity_score
            .partial_cmp(&a.severity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_thresholds_are_inclusive_lower_bound() {
        assert_eq!(Severity::from_components(1.0, 1.0, 1.0).0, Severity::Critical);
        let (level, score) = Severity::from_components(1.0, 1.0, 0.0);
        assert_eq!(score, 0.8);
        assert_eq!(level, Severity::Critical);
    }

    #[test]
    fn severity_is_monotone_in_each_component() {
        let (_, low) = Severity::from_components(0.2, 0.2, 0.2);
        let (_, high) = Severity::from_components(0.9, 0.2, 0.2);
        assert!(high > low);
    }

    #[test]
    fn dedupe_keeps_strongest_instance() {
        let weak = Signal::new("s1", Dimension::Competitive, "brandX", "weak", 0.2, 0.2, 0.2, vec![]);
        let strong = Signal::new("s2", Dimension::Competitive, "brandX", "strong", 0.9, 0.9, 0.9, vec![]);
        let out = dedupe_signals(vec![weak, strong.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, strong.id);
    }

    #[test]
    fn dedupe_is_a_noop_across_distinct_subjects() {
        let a = Signal::new("s1", Dimension::Competitive, "brandX", "a", 0.5, 0.5, 0.5, vec![]);
        let b = Signal::new("s2", Dimension::Competitive, "brandY", "b", 0.5, 0.5, 0.5, vec![]);
        assert_eq!(dedupe_signals(vec![a, b]).len(), 2);
    }
}
