use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::contracts::{PipelineError, PipelineResult};
use crate::data_models::competitor::{CompetitorCandidate, DiscoveryMethod, DiscoveryProvenance};
use crate::run_context::RunContext;

use super::artifact_store::ArtifactStore;
use super::connectors::SearchProvider;
use super::stage::{Stage, StageOutcome};

pub const ARTIFACT_KIND: &str = "competitors_raw";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryArtifact {
    pub candidates: Vec<CompetitorCandidate>,
    pub vertical: String,
    pub vertical_derived: bool,
    pub degraded: bool,
}

/// Small curated lookup used to derive a vertical from the brand name when
/// the caller does not supply one. Deliberately bounded; anything unmatched
/// falls back to `"general"`.
static VERTICAL_LOOKUP: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("glass", "eyewear"),
        ("optic", "eyewear"),
        ("eyewear", "eyewear"),
        ("shoe", "footwear"),
        ("sneaker", "footwear"),
        ("coffee", "beverages"),
        ("roast", "beverages"),
        ("fit", "fitness"),
        ("gym", "fitness"),
        ("skin", "beauty"),
        ("cosmetic", "beauty"),
    ]
});

fn derive_vertical(brand: &str) -> (String, bool) {
    let lower = brand.to_lowercase();
    for (keyword, vertical) in VERTICAL_LOOKUP.iter() {
        if lower.contains(keyword) {
            return (vertical.to_string(), true);
        }
    }
    ("general".to_string(), true)
}

struct QueryTemplate {
    text: String,
    weight: f64,
    method: DiscoveryMethod,
}

fn build_queries(brand: &str, vertical: &str) -> Vec<QueryTemplate> {
    vec![
        QueryTemplate { text: format!("{} competitors", brand), weight: 1.0, method: DiscoveryMethod::DirectSearch },
        QueryTemplate { text: format!("{} vs", brand), weight: 0.8, method: DiscoveryMethod::DirectSearch },
        QueryTemplate { text: format!("{} alternatives", brand), weight: 0.7, method: DiscoveryMethod::DirectSearch },
        QueryTemplate { text: format!("best {} brands", vertical), weight: 0.6, method: DiscoveryMethod::VerticalLookup },
        QueryTemplate { text: format!("brands similar to {}", brand), weight: 0.5, method: DiscoveryMethod::CoMentionExpansion },
    ]
}

/// `raw_score` contribution for one (query, rank) pair: `weight * 1/(rank+1)`.
pub fn score_result(weight: f64, rank: u32) -> f64 {
    weight * (1.0 / (rank as f64 + 1.0))
}

/// Lowercase, strip common suffixes, collapse whitespace — the merge key
/// duplicate candidates across queries are unified on.
pub fn normalize_name_key(name: &str) -> String {
    let mut lower = name.to_lowercase();
    for suffix in [" inc.", " inc", " llc", " corp.", " corp", " co.", " ltd.", " ltd"] {
        if lower.ends_with(suffix) {
            lower.truncate(lower.len() - suffix.len());
        }
    }
    lower.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string()
}

const DENY_LIST: &[&str] = &["competitors", "market share", "alternatives", "brands", "vs"];

pub fn is_denied(normalized_key: &str) -> bool {
    DENY_LIST.iter().any(|term| normalized_key == *term)
}

pub struct DiscoveryStage {
    pub search_provider: Arc<dyn SearchProvider>,
}

impl DiscoveryStage {
    pub fn new(search_provider: Arc<dyn SearchProvider>) -> Self {
        Self { search_provider }
    }
}

#[async_trait]
impl Stage for DiscoveryStage {
    fn name(&self) -> &'static str {
        "discovery"
    }

    async fn run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let (vertical, derived) = match &ctx.vertical {
            Some(v) => (v.clone(), false),
            None => derive_vertical(&ctx.target_brand),
        };

        let queries = build_queries(&ctx.target_brand, &vertical);
        let mut by_key: HashMap<String, CompetitorCandidate> = HashMap::new();
        let mut quota_hit = false;

        for q in &queries {
            match self.search_provider.search(&q.text, 10).await {
                Ok(results) => {
                    for result in results {
                        let key = normalize_name_key(&result.title.split('—').next().unwrap_or(&result.title).trim());
                        if is_denied(&key) || key.is_empty() {
                            continue;
                        }
                        let contribution = score_result(q.weight, result.rank);
                        let provenance = DiscoveryProvenance {
                            query: q.text.clone(),
                            source_url: result.url.clone(),
                            source_title: result.title.clone(),
                            rank: result.rank,
                        };
                        by_key
                            .entry(key.clone())
                            .and_modify(|c| {
                                c.raw_score += contribution;
                                c.provenance.push(provenance.clone());
                            })
                            .or_insert_with(|| CompetitorCandidate {
                                name: result.title.split('—').next().unwrap_or(&result.title).trim().to_string(),
                                normalized_key: key.clone(),
                                discovery_method: q.method,
                                raw_score: contribution,
                                discovered_at: Utc::now(),
                                provenance: vec![provenance],
                            });
                    }
                }
                Err(PipelineError::UpstreamQuota { .. }) => {
                    quota_hit = true;
                }
                Err(e) => return Err(e),
            }
        }

        let mut candidates: Vec<CompetitorCandidate> = by_key.into_values().collect();
        candidates.sort_by(|a, b| b.raw_score.partial_cmp(&a.raw_score).unwrap_or(std::cmp::Ordering::Equal));

        let store = ArtifactStore::for_run(ctx);
        let artifact_name = ctx.artifact_name(ARTIFACT_KIND);

        if candidates.is_empty() {
            return Err(PipelineError::internal("discovery produced zero candidates"));
        }

        let degraded = quota_hit || candidates.len() < ctx.config.discovery_min_candidates;
        let artifact = DiscoveryArtifact {
            candidates,
            vertical,
            vertical_derived: derived,
            degraded,
        };
        store.write(ARTIFACT_KIND, ctx.run_id.as_str(), &artifact)?;

        if degraded {
            Ok(StageOutcome::degraded(
                vec![artifact_name],
                if quota_hit { "search quota exceeded" } else { "fewer than discovery_min_candidates collected" },
            ))
        } else {
            Ok(StageOutcome::ok(vec![artifact_name]))
        }
    }

    async fn dry_run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let (vertical, _) = match &ctx.vertical {
            Some(v) => (v.clone(), false),
            None => derive_vertical(&ctx.target_brand),
        };
        let queries = build_queries(&ctx.target_brand, &vertical);
        let artifact_name = ctx.artifact_name(ARTIFACT_KIND);
        ctx.progress.emit(crate::run_context::ProgressEvent::Note {
            stage: self.name().to_string(),
            message: format!("would issue {} queries; plan artifact {}", queries.len(), artifact_name),
        });
        Ok(StageOutcome::ok(vec![]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_name_key_strips_suffixes_and_case() {
        assert_eq!(normalize_name_key("Acme Inc."), "acme");
        assert_eq!(normalize_name_key("Acme LLC"), "acme");
        assert_eq!(normalize_name_key("  Acme   Corp "), "acme");
    }

    #[test]
    fn score_result_decays_with_rank() {
        let top = score_result(1.0, 0);
        let lower = score_result(1.0, 5);
        assert!(top > lower);
        assert_eq!(top, 1.0);
    }

    #[test]
    fn deny_list_filters_generic_terms() {
        assert!(is_denied("competitors"));
        assert!(!is_denied("northwind"));
    }

    #[test]
    fn vertical_derivation_falls_back_to_general() {
        let (vertical, derived) = derive_vertical("Totally Unrelated Widgets");
        assert_eq!(vertical, "general");
        assert!(derived);
    }

    #[test]
    fn vertical_derivation_matches_keyword() {
        let (vertical, _) = derive_vertical("Clearview Optics");
        assert_eq!(vertical, "eyewear");
    }
}
