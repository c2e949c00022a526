use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contracts::{PipelineError, PipelineResult};
use crate::data_models::competitor::{ActivityTier, RankedCompetitor};
use crate::run_context::RunContext;

use super::artifact_store::ArtifactStore;
use super::connectors::AdArchiveProvider;
use super::curation::{self, CurationArtifact};
use super::stage::{Stage, StageOutcome};

pub const ARTIFACT_KIND: &str = "competitors_ranked";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingArtifact {
    pub ranked: Vec<RankedCompetitor>,
    pub degraded: bool,
}

pub struct RankingStage {
    pub archive: Arc<dyn AdArchiveProvider>,
}

impl RankingStage {
    pub fn new(archive: Arc<dyn AdArchiveProvider>) -> Self {
        Self { archive }
    }
}

#[async_trait]
impl Stage for RankingStage {
    fn name(&self) -> &'static str {
        "ranking"
    }

    async fn run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let store = ArtifactStore::for_run(ctx);
        let curation: CurationArtifact = store
            .read(curation::ARTIFACT_KIND, ctx.run_id.as_str())?
            .ok_or_else(|| PipelineError::schema_drift(curation::ARTIFACT_KIND, "validated"))?;

        let mut archive_unavailable = false;
        let mut ranked = Vec::with_capacity(curation.validated.len());
        for candidate in curation.validated {
            let (activity_tier, estimated_ad_volume) = match self.archive.probe(&candidate.name).await {
                Ok(count) => (ActivityTier::from_active_ad_count(count), count),
                Err(_) => {
                    archive_unavailable = true;
                    (ActivityTier::None, 0)
                }
            };
            ranked.push(RankedCompetitor {
                name: candidate.name,
                normalized_key: candidate.normalized_key,
                tier: candidate.tier,
                market_overlap_pct: candidate.market_overlap_pct,
                ai_confidence: candidate.ai_confidence,
                quality_score: candidate.quality_score,
                reasoning: candidate.reasoning,
                activity_tier,
                estimated_ad_volume,
                rank: 0,
            });
        }

        if archive_unavailable {
            ranked.sort_by(|a, b| b.quality_score.partial_cmp(&a.quality_score).unwrap_or(std::cmp::Ordering::Equal));
        } else {
            ranked.sort_by(|a, b| b.ranking_score().partial_cmp(&a.ranking_score()).unwrap_or(std::cmp::Ordering::Equal));
        }

        ranked.truncate(ctx.config.max_competitors);
        for (idx, c) in ranked.iter_mut().enumerate() {
            c.rank = idx + 1;
        }

        let artifact_name = ctx.artifact_name(ARTIFACT_KIND);
        let artifact = RankingArtifact { ranked, degraded: archive_unavailable };
        store.write(ARTIFACT_KIND, ctx.run_id.as_str(), &artifact)?;

        if archive_unavailable {
            Ok(StageOutcome::degraded(vec![artifact_name], "ad archive probe unavailable, used AI-quality-only ordering"))
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
    use crate::data_models::competitor::CompetitorTier;

    fn sample(quality: f64, tier: ActivityTier) -> RankedCompetitor {
        RankedCompetitor {
            name: "Acme".into(),
            normalized_key: "acme".into(),
            tier: CompetitorTier::Challenger,
            market_overlap_pct: 30.0,
            ai_confidence: 0.7,
            quality_score: quality,
            reasoning: "r".into(),
            activity_tier: tier,
            estimated_ad_volume: 10,
            rank: 0,
        }
    }

    #[test]
    fn ranking_score_weights_quality_and_tier() {
        let major = sample(0.5, ActivityTier::Major);
        let none = sample(0.5, ActivityTier::None);
        assert!(major.ranking_score() > none.ranking_score());
        assert_eq!(major.ranking_score(), 0.4 * 0.5 + 0.6 * 1.0);
    }
}
