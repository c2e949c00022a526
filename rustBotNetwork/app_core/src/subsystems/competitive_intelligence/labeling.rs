use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contracts::{PipelineError, PipelineResult};
use crate::data_models::label::{AngleComplexity, StrategicLabel};
use crate::run_context::RunContext;

use super::artifact_store::ArtifactStore;
use super::connectors::AiWarehouse;
use super::ingestion::{self, IngestionArtifact};
use super::stage::{Stage, StageOutcome};

pub const ARTIFACT_KIND: &str = "ads_strategic_labels";

/// Batches large ad sets into provider-sized chunks before each structured
/// generation call.
const CHUNK_SIZE: usize = 50;
const MALFORMED_DEGRADE_THRESHOLD: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelingArtifact {
    pub labels: Vec<StrategicLabel>,
    pub degraded: bool,
}

pub struct LabelingStage {
    pub warehouse: Arc<dyn AiWarehouse>,
}

impl LabelingStage {
    pub fn new(warehouse: Arc<dyn AiWarehouse>) -> Self {
        Self { warehouse }
    }
}

#[async_trait]
impl Stage for LabelingStage {
    fn name(&self) -> &'static str {
        "strategic_labeling"
    }

    async fn run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let store = ArtifactStore::for_run(ctx);
        let ingestion: IngestionArtifact = store
            .read(ingestion::ARTIFACT_KIND, ctx.run_id.as_str())?
            .ok_or_else(|| PipelineError::schema_drift(ingestion::ARTIFACT_KIND, "ads"))?;

        // Preserve labels from a prior run on this namespace; only newly
        // seen ads are sent to the AI.
        let existing: LabelingArtifact = store
            .read(ARTIFACT_KIND, ctx.run_id.as_str())?
            .unwrap_or(LabelingArtifact { labels: vec![], degraded: false });
        let mut by_ad: HashMap<String, StrategicLabel> =
            existing.labels.into_iter().map(|l| (l.ad_id.clone(), l)).collect();

        let to_label: Vec<_> = ingestion
            .ads
            .iter()
            .filter(|ad| !ad.creative_text.is_empty() && !by_ad.contains_key(&ad.ad_id))
            .collect();

        let mut total_rows = 0usize;
        let mut affected_rows = 0usize;

        for chunk in to_label.chunks(CHUNK_SIZE) {
            let ad_ids: Vec<String> = chunk.iter().map(|a| a.ad_id.clone()).collect();
            let texts: Vec<String> = chunk.iter().map(|a| a.creative_text.clone()).collect();
            total_rows += ad_ids.len();
            let rows = self.warehouse.label_ads(&ad_ids, &texts).await?;

            for row in rows {
                let (angles, angle_complexity) =
                    StrategicLabel::finalize_angles(row.angles, ctx.config.angle_confidence_floor);

                let mut labeling_degraded = false;
                let urgency_score = StrategicLabel::clamp_unit(row.urgency_score).unwrap_or_else(|| {
                    labeling_degraded = true;
                    0.0
                });
                let promotional_intensity = StrategicLabel::clamp_unit(row.promotional_intensity).unwrap_or_else(|| {
                    labeling_degraded = true;
                    0.0
                });
                let brand_voice_score = StrategicLabel::clamp_unit(row.brand_voice_score).unwrap_or_else(|| {
                    labeling_degraded = true;
                    0.0
                });
                if labeling_degraded {
                    affected_rows += 1;
                }

                by_ad.insert(
                    row.ad_id.clone(),
                    StrategicLabel {
                        ad_id: row.ad_id,
                        funnel: row.funnel,
                        angles,
                        angle_complexity,
                        persona: row.persona,
                        topics: row.topics,
                        urgency_score,
                        promotional_intensity,
                        brand_voice_score,
                        labeling_degraded,
                    },
                );
            }
        }

        let mut labels: Vec<StrategicLabel> = by_ad.into_values().collect();
        labels.sort_by(|a, b| a.ad_id.cmp(&b.ad_id));

        let malformed_rate = if total_rows > 0 { affected_rows as f64 / total_rows as f64 } else { 0.0 };
        let degraded = malformed_rate > MALFORMED_DEGRADE_THRESHOLD;

        let artifact_name = ctx.artifact_name(ARTIFACT_KIND);
        let artifact = LabelingArtifact { labels, degraded };
        store.write(ARTIFACT_KIND, ctx.run_id.as_str(), &artifact)?;

        if degraded {
            Ok(StageOutcome::degraded(
                vec![artifact_name],
                format!("{:.0}% of labeled rows had malformed numeric fields", malformed_rate * 100.0),
            ))
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
    use crate::data_models::label::{AngleAssignment, AngleKind};

    #[test]
    fn angle_complexity_flags_empty_set_after_floor() {
        let (angles, complexity) = StrategicLabel::finalize_angles(
            vec![AngleAssignment { kind: AngleKind::Promotional, confidence: 0.1 }],
            0.5,
        );
        assert!(angles.is_empty());
        assert_eq!(complexity, AngleComplexity::NoAnglesDetected);
    }
}
