use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a candidate name surfaced during Discovery. Carried through to
/// Curation/Ranking for provenance and to compute the `method_weight` bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    DirectSearch,
    VerticalLookup,
    CoMentionExpansion,
}

impl DiscoveryMethod {
    /// Resolves the open question in spec design notes: the mapping from
    /// discovery method to the `method_weight` term in the curation quality
    /// formula. Direct search is the strongest signal (the brand name itself
    /// surfaced a competitor), co-mention expansion the weakest (it is two
    /// hops removed from the query).
    pub fn method_weight(&self) -> f64 {
        match self {
            DiscoveryMethod::DirectSearch => 1.0,
            DiscoveryMethod::VerticalLookup => 0.7,
            DiscoveryMethod::CoMentionExpansion => 0.4,
        }
    }
}

/// One provenance pointer: which query/result produced (part of) a
/// candidate's score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryProvenance {
    pub query: String,
    pub source_url: String,
    pub source_title: String,
    pub rank: u32,
}

/// A brand name surfaced by Discovery, not yet validated as a real
/// competitor. `raw_score` is the sum over (query, rank) contributions; see
/// `discovery::score_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorCandidate {
    pub name: String,
    pub normalized_key: String,
    pub discovery_method: DiscoveryMethod,
    pub raw_score: f64,
    pub discovered_at: DateTime<Utc>,
    pub provenance: Vec<DiscoveryProvenance>,
}

/// Market position assigned by Curation's AI consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitorTier {
    Incumbent,
    Challenger,
    Niche,
    Emerging,
}

/// A candidate that survived pre-filtering and 2-of-3 AI consensus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedCompetitor {
    pub name: String,
    pub normalized_key: String,
    pub tier: CompetitorTier,
    pub market_overlap_pct: f64,
    pub ai_confidence: f64,
    pub quality_score: f64,
    pub reasoning: String,
    pub discovery_method: DiscoveryMethod,
    pub raw_score: f64,
}

/// Ad-archive activity tier used to weight and cap the ranked competitor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityTier {
    Major,
    Moderate,
    Minor,
    None,
}

impl ActivityTier {
    pub fn from_active_ad_count(count: u64) -> Self {
        if count >= 50 {
            ActivityTier::Major
        } else if count >= 10 {
            ActivityTier::Moderate
        } else if count >= 1 {
            ActivityTier::Minor
        } else {
            ActivityTier::None
        }
    }

    /// `meta_weight` term in the Ranking re-sort formula.
    pub fn meta_weight(&self) -> f64 {
        match self {
            ActivityTier::Major => 1.0,
            ActivityTier::Moderate => 0.6,
            ActivityTier::Minor => 0.3,
            ActivityTier::None => 0.0,
        }
    }
}

/// Final, ranked, budget-capped competitor set handed to Ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCompetitor {
    pub name: String,
    pub normalized_key: String,
    pub tier: CompetitorTier,
    pub market_overlap_pct: f64,
    pub ai_confidence: f64,
    pub quality_score: f64,
    pub reasoning: String,
    pub activity_tier: ActivityTier,
    pub estimated_ad_volume: u64,
    pub rank: usize,
}

impl RankedCompetitor {
    /// The Ranking re-sort score: `0.4*ai_quality + 0.6*meta_weight`.
    pub fn ranking_score(&self) -> f64 {
        0.4 * self.quality_score + 0.6 * self.activity_tier.meta_weight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_tier_thresholds_are_inclusive_lower_bound() {
        assert_eq!(ActivityTier::from_active_ad_count(50), ActivityTier::Major);
        assert_eq!(ActivityTier::from_active_ad_count(49), ActivityTier::Moderate);
        assert_eq!(ActivityTier::from_active_ad_count(10), ActivityTier::Moderate);
        assert_eq!(ActivityTier::from_active_ad_count(9), ActivityTier::Minor);
        assert_eq!(ActivityTier::from_active_ad_count(1), ActivityTier::Minor);
        assert_eq!(ActivityTier::from_active_ad_count(0), ActivityTier::None);
    }

    #[test]
    fn method_weight_orders_direct_search_highest() {
        assert!(DiscoveryMethod::DirectSearch.method_weight() > DiscoveryMethod::VerticalLookup.method_weight());
        assert!(DiscoveryMethod::VerticalLookup.method_weight() > DiscoveryMethod::CoMentionExpansion.method_weight());
    }
}
