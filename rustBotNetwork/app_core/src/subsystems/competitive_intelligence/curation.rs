use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contracts::{PipelineError, PipelineResult};
use crate::data_models::competitor::{CompetitorTier, ValidatedCompetitor};
use crate::run_context::RunContext;

use super::artifact_store::ArtifactStore;
use super::connectors::{AiWarehouse, CompetitorValidationRow, ValidationRound};
use super::discovery::{self, DiscoveryArtifact};
use super::stage::{Stage, StageOutcome};

pub const ARTIFACT_KIND: &str = "competitors_validated";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationArtifact {
    pub validated: Vec<ValidatedCompetitor>,
    pub degraded: bool,
}

const PREFILTER_MEDIAN_RATIO: f64 = 0.3;
const CONSENSUS_MIN_ACCEPTING_ROUNDS: usize = 2;
const CONSENSUS_CONFIDENCE_FLOOR: f64 = 0.6;
const MIN_ACCEPTED_FOR_HEALTHY: usize = 3;

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn mode_tier(tiers: &[CompetitorTier]) -> CompetitorTier {
    let mut counts: HashMap<u8, (CompetitorTier, usize)> = HashMap::new();
    for tier in tiers {
        counts
            .entry(*tier as u8)
            .and_modify(|(_, c)| *c += 1)
            .or_insert((*tier, 1));
    }
    counts
        .into_values()
        .max_by_key(|(_, c)| *c)
        .map(|(t, _)| t)
        .unwrap_or(CompetitorTier::Emerging)
}

pub struct CurationStage {
    pub warehouse: Arc<dyn AiWarehouse>,
}

impl CurationStage {
    pub fn new(warehouse: Arc<dyn AiWarehouse>) -> Self {
        Self { warehouse }
    }
}

#[async_trait]
impl Stage for CurationStage {
    fn name(&self) -> &'static str {
        "curation"
    }

    async fn run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let store = ArtifactStore::for_run(ctx);
        let discovery: DiscoveryArtifact = store
            .read(discovery::ARTIFACT_KIND, ctx.run_id.as_str())?
            .ok_or_else(|| PipelineError::schema_drift(discovery::ARTIFACT_KIND, "candidates"))?;

        let mut raw_scores: Vec<f64> = discovery.candidates.iter().map(|c| c.raw_score).collect();
        let score_floor = PREFILTER_MEDIAN_RATIO * median(&mut raw_scores);
        let max_score = raw_scores.iter().cloned().fold(0.0_f64, f64::max).max(1e-9);

        let prefiltered: Vec<_> = discovery
            .candidates
            .into_iter()
            .filter(|c| !discovery::is_denied(&c.normalized_key) && c.raw_score >= score_floor)
            .collect();

        let names: Vec<String> = prefiltered.iter().map(|c| c.name.clone()).collect();
        let rounds = [
            ValidationRound::MarketOverlap,
            ValidationRound::CompetitivePositioning,
            ValidationRound::BrandSimilarity,
        ];

        let mut round_results: Vec<Vec<CompetitorValidationRow>> = Vec::with_capacity(rounds.len());
        for round in rounds {
            round_results.push(self.warehouse.validate_competitors(&names, round).await?);
        }

        let mut validated = Vec::new();
        for (idx, candidate) in prefiltered.iter().enumerate() {
            let rows: Vec<&CompetitorValidationRow> = round_results.iter().map(|r| &r[idx]).collect();
            let accepting: Vec<&&CompetitorValidationRow> = rows.iter().filter(|r| r.is_competitor).collect();
            if accepting.len() < CONSENSUS_MIN_ACCEPTING_ROUNDS {
                continue;
            }
            let avg_confidence = accepting.iter().map(|r| r.confidence).sum::<f64>() / accepting.len() as f64;
            if avg_confidence < CONSENSUS_CONFIDENCE_FLOOR {
                continue;
            }
            let avg_market_overlap = accepting.iter().map(|r| r.market_overlap_pct).sum::<f64>() / accepting.len() as f64;
            let tier = mode_tier(&accepting.iter().map(|r| r.tier).collect::<Vec<_>>());
            let normalized_raw_score = candidate.raw_score / max_score;
            let method_weight = candidate.discovery_method.method_weight();
            let quality_score = 0.4 * avg_confidence
                + 0.3 * normalized_raw_score
                + 0.2 * (avg_market_overlap / 100.0)
                + 0.1 * method_weight;
            let reasoning = accepting
                .iter()
                .map(|r| r.reasoning.clone())
                .collect::<Vec<_>>()
                .join(" ");

            validated.push(ValidatedCompetitor {
                name: candidate.name.clone(),
                normalized_key: candidate.normalized_key.clone(),
                tier,
                market_overlap_pct: avg_market_overlap,
                ai_confidence: avg_confidence,
                quality_score,
                reasoning,
                discovery_method: candidate.discovery_method,
                raw_score: candidate.raw_score,
            });
        }

        validated.sort_by(|a, b| b.quality_score.partial_cmp(&a.quality_score).unwrap_or(std::cmp::Ordering::Equal));

        let degraded = validated.len() < MIN_ACCEPTED_FOR_HEALTHY;
        let artifact_name = ctx.artifact_name(ARTIFACT_KIND);
        let artifact = CurationArtifact { validated, degraded };
        store.write(ARTIFACT_KIND, ctx.run_id.as_str(), &artifact)?;

        if degraded {
            Ok(StageOutcome::degraded(vec![artifact_name], "fewer than 3 accepted candidates"))
        } else {
            Ok(StageOutcome::ok(vec![artifact_name]))
        }
    }

    async fn dry_run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        ctx.progress.emit(crate::run_context::ProgressEvent::Note {
            stage: self.name().to_string(),
            message: format!("would plan artifact {}", ctx.artifact_name(ARTIFACT_KIND)),
        });
        Ok(StageOutcome::ok(vec![]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(is_competitor: bool, confidence: f64) -> CompetitorValidationRow {
        CompetitorValidationRow {
            name: "Acme".into(),
            is_competitor,
            confidence,
            tier: CompetitorTier::Challenger,
            market_overlap_pct: 40.0,
            reasoning: "r".into(),
        }
    }

    #[test]
    fn median_of_odd_length_list() {
        let mut v = vec![3.0, 1.0, 2.0];
        assert_eq!(median(&mut v), 2.0);
    }

    #[test]
    fn median_of_even_length_list() {
        let mut v = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(median(&mut v), 2.5);
    }

    #[test]
    fn consensus_scenario_reject() {
        let rows = vec![row(true, 0.8), row(false, 0.9), row(false, 0.7)];
        let accepting: Vec<_> = rows.iter().filter(|r| r.is_competitor).collect();
        assert!(accepting.len() < CONSENSUS_MIN_ACCEPTING_ROUNDS);
    }

    #[test]
    fn consensus_scenario_accept_with_expected_confidence() {
        let rows = vec![row(true, 0.55), row(true, 0.75), row(false, 0.9)];
        let accepting: Vec<_> = rows.iter().filter(|r| r.is_competitor).collect();
        assert_eq!(accepting.len(), 2);
        let avg = accepting.iter().map(|r| r.confidence).sum::<f64>() / accepting.len() as f64;
        assert!((avg - 0.65).abs() < 1e-9);
        assert!(avg >= CONSENSUS_CONFIDENCE_FLOOR);
    }
}
