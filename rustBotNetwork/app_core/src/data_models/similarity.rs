use serde::{Deserialize, Serialize};

/// A directional cross-brand similarity edge: `ad_a` is the earlier ("source")
/// ad, `ad_b` is the later ("copier") ad. Transient — materialized fresh on
/// every run, never read back from a prior run's artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityEdge {
    pub ad_a_id: String,
    pub ad_b_id: String,
    pub source_brand: String,
    pub copier_brand: String,
    pub cosine_distance: f64,
    pub lag_days: i64,
    pub confidence: f64,
}

impl SimilarityEdge {
    /// Confidence is `1 - distance`, scaled into [0,1] given the distance is
    /// already bounded to the configured threshold on the caller side.
    pub fn confidence_from_distance(distance: f64) -> f64 {
        (1.0 - distance).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_inverse_of_distance() {
        assert_eq!(SimilarityEdge::confidence_from_distance(0.3), 0.7);
        assert_eq!(SimilarityEdge::confidence_from_distance(1.5), 0.0);
    }
}
