use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contracts::{PipelineError, PipelineResult};
use crate::data_models::embedding::{Embedding, EmbeddingQualityFlags};
use crate::run_context::RunContext;

use super::artifact_store::ArtifactStore;
use super::connectors::AiWarehouse;
use super::ingestion::{self, IngestionArtifact};
use super::stage::{Stage, StageOutcome};

pub const ARTIFACT_KIND: &str = "ads_embeddings";
const MODEL_VERSION: &str = "adcompete-semantic-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsArtifact {
    pub embeddings: Vec<Embedding>,
    pub skipped_ad_ids: Vec<String>,
}

pub struct EmbeddingsStage {
    pub warehouse: Arc<dyn AiWarehouse>,
}

impl EmbeddingsStage {
    pub fn new(warehouse: Arc<dyn AiWarehouse>) -> Self {
        Self { warehouse }
    }
}

/// Splits `creative_text` back into title/body-ish segments for the
/// structured-text builder. Ingestion already merges title/body/cards with
/// `|`; the first segment stands in for title, the rest for body, and the
/// ad's own text is reused for the CTA hint since the unified schema does
/// not carry a separate CTA field downstream of Ingestion.
fn split_for_embedding_text(creative_text: &str) -> (String, String, String) {
    let mut parts = creative_text.splitn(2, '|');
    let title = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    (title, body, String::new())
}

#[async_trait]
impl Stage for EmbeddingsStage {
    fn name(&self) -> &'static str {
        "embeddings"
    }

    async fn run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let store = ArtifactStore::for_run(ctx);
        let ingestion: IngestionArtifact = store
            .read(ingestion::ARTIFACT_KIND, ctx.run_id.as_str())?
            .ok_or_else(|| PipelineError::schema_drift(ingestion::ARTIFACT_KIND, "ads"))?;

        let mut embeddings = Vec::new();
        let mut skipped_ad_ids = Vec::new();

        for ad in &ingestion.ads {
            let (title, body, cta) = split_for_embedding_text(&ad.creative_text);
            let structured_text = Embedding::build_structured_text(&title, &body, &cta);
            if Embedding::should_skip(&structured_text) {
                skipped_ad_ids.push(ad.ad_id.clone());
                continue;
            }
            let vector = self.warehouse.embed_text(&structured_text).await?;
            embeddings.push(Embedding {
                ad_id: ad.ad_id.clone(),
                vector,
                model_version: MODEL_VERSION.to_string(),
                quality_flags: EmbeddingQualityFlags {
                    has_title: !title.trim().is_empty(),
                    has_body: !body.trim().is_empty(),
                    has_cta: !cta.trim().is_empty(),
                },
            });
        }

        let artifact_name = ctx.artifact_name(ARTIFACT_KIND);
        let artifact = EmbeddingsArtifact { embeddings, skipped_ad_ids };
        store.write(ARTIFACT_KIND, ctx.run_id.as_str(), &artifact)?;
        Ok(StageOutcome::ok(vec![artifact_name]))
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

    #[test]
    fn short_ads_are_skipped_not_embedded() {
        assert!(Embedding::should_skip("Hi"));
    }

    #[test]
    fn split_preserves_title_and_body() {
        let (title, body, _) = split_for_embedding_text("Big Sale|Everything must go|Card one");
        assert_eq!(title, "Big Sale");
        assert_eq!(body, "Everything must go|Card one");
    }
}
