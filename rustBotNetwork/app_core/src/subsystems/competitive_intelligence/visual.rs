use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::contracts::{PipelineError, PipelineResult};
use crate::data_models::ad::{Ad, MediaType};
use crate::data_models::visual::{VisualIntelligence, VisualSourceOutcome};
use crate::run_context::RunContext;

use super::artifact_store::ArtifactStore;
use super::connectors::AiWarehouse;
use super::ingestion::{self, IngestionArtifact};
use super::labeling::{self, LabelingArtifact};
use super::stage::{Stage, StageOutcome};

pub const ARTIFACT_KIND: &str = "visual_intelligence";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualIntelligenceArtifact {
    pub rows: Vec<VisualIntelligence>,
    pub sampled_ad_ids: Vec<String>,
    pub degraded: bool,
    pub requested_quota: HashMap<String, usize>,
    pub granted_quota: HashMap<String, usize>,
}

/// Adaptive per-brand sample size by portfolio size tiers.
pub fn sample_size(portfolio_size: usize) -> usize {
    let n = portfolio_size as f64;
    let raw = if portfolio_size <= 20 {
        (n * 0.5).round().min(10.0)
    } else if portfolio_size <= 50 {
        n * 0.3
    } else if portfolio_size <= 100 {
        n * 0.2
    } else {
        return 15;
    };
    raw.round() as usize
}

fn complexity_weight(media_type: MediaType) -> f64 {
    match media_type {
        MediaType::Carousel | MediaType::Video | MediaType::Mixed => 1.0,
        MediaType::Image | MediaType::Dco => 0.6,
        MediaType::TextOnly => 0.1,
    }
}

/// Multi-factor sampling score: recency (30%), visual complexity (25%), card
/// variations (25%), strategic diversity (20%).
pub fn multi_factor_score(ad: &Ad, promotional_intensity: f64, now: chrono::DateTime<Utc>) -> f64 {
    let days_since_start = (now - ad.start_ts).num_days().max(0) as f64;
    let recency = 0.5_f64.powf(days_since_start / 7.0);
    let complexity = complexity_weight(ad.media_type);
    let card_variation = (ad.card_count as f64 / 5.0).min(1.0);
    let diversity = (promotional_intensity - 0.5).abs() * 2.0;
    0.3 * recency + 0.25 * complexity + 0.25 * card_variation + 0.2 * diversity
}

pub struct VisualStage {
    pub warehouse: Arc<dyn AiWarehouse>,
}

impl VisualStage {
    pub fn new(warehouse: Arc<dyn AiWarehouse>) -> Self {
        Self { warehouse }
    }
}

#[async_trait]
impl Stage for VisualStage {
    fn name(&self) -> &'static str {
        "visual_intelligence"
    }

    async fn run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let store = ArtifactStore::for_run(ctx);
        let ingestion: IngestionArtifact = store
            .read(ingestion::ARTIFACT_KIND, ctx.run_id.as_str())?
            .ok_or_else(|| PipelineError::schema_drift(ingestion::ARTIFACT_KIND, "ads"))?;
        let labels: LabelingArtifact = store
            .read(labeling::ARTIFACT_KIND, ctx.run_id.as_str())?
            .unwrap_or(LabelingArtifact { labels: vec![], degraded: false });
        let intensity_by_ad: HashMap<&str, f64> =
            labels.labels.iter().map(|l| (l.ad_id.as_str(), l.promotional_intensity)).collect();

        let now = Utc::now();
        let mut by_brand: HashMap<&str, Vec<&Ad>> = HashMap::new();
        for ad in &ingestion.ads {
            by_brand.entry(ad.brand.as_str()).or_default().push(ad);
        }

        let mut quotas: HashMap<String, usize> = HashMap::new();
        let mut total_quota = 0usize;
        for (brand, ads) in &by_brand {
            let quota = sample_size(ads.len());
            quotas.insert(brand.to_string(), quota);
            total_quota += quota;
        }

        let requested_quota = quotas.clone();
        let mut budget_shrunk = false;
        if total_quota > ctx.config.visual_total_budget && total_quota > 0 {
            budget_shrunk = true;
            let scale = ctx.config.visual_total_budget as f64 / total_quota as f64;
            for quota in quotas.values_mut() {
                *quota = ((*quota as f64) * scale).floor() as usize;
            }
        }

        let mut selected: Vec<&Ad> = Vec::new();
        for (brand, ads) in &by_brand {
            let quota = *quotas.get(*brand).unwrap_or(&0);
            let mut scored: Vec<(&Ad, f64)> = ads
                .iter()
                .map(|ad| {
                    let intensity = intensity_by_ad.get(ad.ad_id.as_str()).copied().unwrap_or(0.5);
                    (*ad, multi_factor_score(ad, intensity, now))
                })
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            selected.extend(scored.into_iter().take(quota).map(|(ad, _)| ad));
        }

        let mut rows = Vec::with_capacity(selected.len());
        let mut sampled_ad_ids = Vec::with_capacity(selected.len());
        for ad in selected {
            sampled_ad_ids.push(ad.ad_id.clone());
            let prompt = format!("Assess visual-text alignment and positioning for ad {}", ad.ad_id);
            let candidate_uris: Vec<&str> = ad.primary_visual_uri.iter().map(|s| s.as_str())
                .chain(ad.visual_uris.iter().map(|s| s.as_str()))
                .collect();

            let mut outcome = VisualSourceOutcome::TextOnly;
            let mut analysis = None;
            for (idx, uri) in candidate_uris.iter().enumerate() {
                match self.warehouse.analyze_visual(uri, &prompt).await {
                    Ok(row) => {
                        outcome = if idx == 0 { VisualSourceOutcome::PrimaryUri } else { VisualSourceOutcome::BackupUri };
                        analysis = Some(row);
                        break;
                    }
                    Err(_) => continue,
                }
            }
            let visual_unavailable = analysis.is_none();
            let analysis = match analysis {
                Some(a) => a,
                None => self
                    .warehouse
                    .analyze_visual(&format!("text-only://{}", ad.ad_id), &prompt)
                    .await?,
            };

            rows.push(VisualIntelligence {
                ad_id: ad.ad_id.clone(),
                visual_text_alignment: analysis.visual_text_alignment,
                visual_style: analysis.visual_style,
                visual_focus: analysis.visual_focus,
                brand_consistency: analysis.brand_consistency,
                creative_fatigue_risk: analysis.creative_fatigue_risk,
                differentiation: analysis.differentiation,
                source_outcome: outcome,
                visual_unavailable,
            });
        }

        let artifact_name = ctx.artifact_name(ARTIFACT_KIND);
        let artifact = VisualIntelligenceArtifact {
            rows,
            sampled_ad_ids,
            degraded: budget_shrunk,
            requested_quota,
            granted_quota: quotas,
        };
        store.write(ARTIFACT_KIND, ctx.run_id.as_str(), &artifact)?;

        // Budget Exceeded is explicitly "not an error"; shrinking and
        // continuing is healthy behavior, not a DEGRADED condition.
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
    fn sample_size_matches_documented_scenario() {
        assert_eq!(sample_size(10), 5);
        assert_eq!(sample_size(40), 12);
        assert_eq!(sample_size(80), 16);
        assert_eq!(sample_size(300), 15);
    }

    #[test]
    fn sample_size_caps_small_portfolio_at_ten() {
        assert_eq!(sample_size(20), 10);
    }
}
