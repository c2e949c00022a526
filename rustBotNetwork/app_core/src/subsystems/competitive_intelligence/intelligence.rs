use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contracts::{PipelineError, PipelineResult};
use crate::data_models::ad::Ad;
use crate::data_models::label::StrategicLabel;
use crate::data_models::signal::{dedupe_signals, Dimension, Signal};
use crate::data_models::visual::{VisualIntelligence, VisualTextAlignment};
use crate::run_context::RunContext;

use super::analysis::{self, SimilarityArtifact};
use super::artifact_store::ArtifactStore;
use super::ingestion::{self, IngestionArtifact};
use super::labeling::{self, LabelingArtifact};
use super::stage::{Stage, StageOutcome};
use super::visual::{self, VisualIntelligenceArtifact};

pub const ARTIFACT_KIND: &str = "signals";

/// Sum of squared shares; 1.0 for a single-holder market, ~0 for a perfectly
/// even split across many holders.
fn herfindahl(shares: impl Iterator<Item = f64>) -> f64 {
    shares.map(|s| s * s).sum()
}

fn proportions(keys: impl Iterator<Item = String>) -> HashMap<String, f64> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return HashMap::new();
    }
    counts.into_iter().map(|(k, c)| (k, c as f64 / total as f64)).collect()
}

// ---------------------------------------------------------------------
// Competitive dimension
// ---------------------------------------------------------------------

fn competitive_signals(analysis: &SimilarityArtifact, target_brand: &str) -> Vec<Signal> {
    const SIMILARITY_ALERT_FLOOR: f64 = 0.7;
    const PLATFORM_CONCENTRATION_FLOOR: f64 = 0.7;

    let mut out = Vec::new();
    for agg in &analysis.similarity_aggregates {
        if agg.source_brand != target_brand && agg.copier_brand != target_brand {
            continue;
        }
        if agg.max_similarity < SIMILARITY_ALERT_FLOOR {
            continue;
        }
        let (subject, claim) = if agg.copier_brand == target_brand {
            (
                format!("{}<-{}", agg.copier_brand, agg.source_brand),
                format!("{} appears to be closely mirroring {}'s recent creative", agg.copier_brand, agg.source_brand),
            )
        } else {
            (
                format!("{}->{}", agg.source_brand, agg.copier_brand),
                format!("{} is closely mirrored by {}'s recent creative", agg.source_brand, agg.copier_brand),
            )
        };
        let actionability = (agg.edge_count as f64 / 5.0).min(1.0);
        out.push(Signal::new(
            format!("competitive:mirroring:{}", subject),
            Dimension::Competitive,
            subject,
            claim,
            agg.max_similarity,
            agg.mean_similarity,
            actionability,
            vec![],
        ));
    }

    for row in &analysis.current_state {
        if row.brand != target_brand {
            continue;
        }
        if let Some((platform, share)) = row
            .platform_distribution
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        {
            if *share >= PLATFORM_CONCENTRATION_FLOOR {
                out.push(Signal::new(
                    format!("competitive:platform_concentration:{}", target_brand),
                    Dimension::Competitive,
                    target_brand.to_string(),
                    format!("{} concentrates {:.0}% of recent spend on {}", target_brand, share * 100.0, platform),
                    0.7,
                    *share,
                    0.6,
                    vec![],
                ));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------
// Creative dimension
// ---------------------------------------------------------------------

fn creative_signals(ads: &[Ad], labels: &HashMap<String, StrategicLabel>, target_brand: &str) -> Vec<Signal> {
    let brand_ads: Vec<&Ad> = ads.iter().filter(|a| a.brand == target_brand).collect();
    if brand_ads.is_empty() {
        return Vec::new();
    }
    let brand_labels: Vec<&StrategicLabel> = brand_ads.iter().filter_map(|a| labels.get(&a.ad_id)).collect();

    let mut out = Vec::new();

    if !brand_labels.is_empty() {
        let mean_urgency = brand_labels.iter().map(|l| l.urgency_score).sum::<f64>() / brand_labels.len() as f64;
        if mean_urgency >= 0.6 {
            out.push(Signal::new(
                format!("creative:emotional_intensity:{}", target_brand),
                Dimension::Creative,
                target_brand.to_string(),
                format!("{}'s creative skews high-urgency (mean urgency {:.2})", target_brand, mean_urgency),
                0.6,
                mean_urgency,
                0.5,
                vec![],
            ));
        }

        let mean_brand_voice = brand_labels.iter().map(|l| l.brand_voice_score).sum::<f64>() / brand_labels.len() as f64;
        out.push(Signal::new(
            format!("creative:brand_voice:{}", target_brand),
            Dimension::Creative,
            target_brand.to_string(),
            format!("{}'s average brand-voice consistency score is {:.2}", target_brand, mean_brand_voice),
            0.55,
            mean_brand_voice,
            0.4,
            vec![],
        ));
    }

    let mean_length = brand_ads.iter().map(|a| a.creative_text.chars().count() as f64).sum::<f64>() / brand_ads.len() as f64;
    out.push(Signal::new(
        format!("creative:avg_length:{}", target_brand),
        Dimension::Creative,
        target_brand.to_string(),
        format!("{}'s average creative copy length is {:.0} characters", target_brand, mean_length),
        0.5,
        0.3,
        0.3,
        vec![],
    ));

    let self_mentions = brand_ads
        .iter()
        .filter(|a| a.creative_text.to_lowercase().contains(&target_brand.to_lowercase()))
        .count();
    let mention_rate = self_mentions as f64 / brand_ads.len() as f64;
    if mention_rate >= 0.5 {
        out.push(Signal::new(
            format!("creative:brand_mention_rate:{}", target_brand),
            Dimension::Creative,
            target_brand.to_string(),
            format!("{} names itself in {:.0}% of its own ad copy", target_brand, mention_rate * 100.0),
            0.6,
            0.4,
            0.4,
            vec![],
        ));
    }

    out
}

// ---------------------------------------------------------------------
// Channel dimension
// ---------------------------------------------------------------------

fn channel_signals(analysis: &SimilarityArtifact, target_brand: &str) -> Vec<Signal> {
    let mut out = Vec::new();
    let row = match analysis.current_state.iter().find(|r| r.brand == target_brand) {
        Some(r) => r,
        None => return out,
    };

    let concentration = herfindahl(row.platform_distribution.values().copied());
    let platform_count = row.platform_distribution.len();
    if concentration >= 0.5 && platform_count > 1 {
        out.push(Signal::new(
            format!("channel:concentration:{}", target_brand),
            Dimension::Channel,
            target_brand.to_string(),
            format!("{}'s platform mix is concentrated (Herfindahl {:.2} across {} platforms)", target_brand, concentration, platform_count),
            0.6,
            concentration,
            0.5,
            vec![],
        ));
    } else if platform_count >= 3 && concentration < 0.4 {
        out.push(Signal::new(
            format!("channel:diversified:{}", target_brand),
            Dimension::Channel,
            target_brand.to_string(),
            format!("{} spreads spend evenly across {} platforms, limiting single-channel risk", target_brand, platform_count),
            0.55,
            1.0 - concentration,
            0.3,
            vec![],
        ));
    }
    out
}

// ---------------------------------------------------------------------
// Audience dimension
// ---------------------------------------------------------------------

fn audience_signals(labels: &HashMap<String, StrategicLabel>, ads: &[Ad], target_brand: &str) -> Vec<Signal> {
    let brand_ad_ids: Vec<&str> = ads.iter().filter(|a| a.brand == target_brand).map(|a| a.ad_id.as_str()).collect();
    let brand_labels: Vec<&StrategicLabel> = brand_ad_ids.iter().filter_map(|id| labels.get(*id)).collect();
    if brand_labels.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();

    let persona_shares = proportions(brand_labels.iter().filter_map(|l| l.persona.clone()));
    let persona_concentration = herfindahl(persona_shares.values().copied());
    if persona_concentration >= 0.6 {
        out.push(Signal::new(
            format!("audience:persona_concentration:{}", target_brand),
            Dimension::Audience,
            target_brand.to_string(),
            format!("{}'s creative targets a narrow persona set (Herfindahl {:.2})", target_brand, persona_concentration),
            0.6,
            persona_concentration,
            0.5,
            vec![],
        ));
    }

    let mut topic_counts: HashMap<&str, usize> = HashMap::new();
    for label in &brand_labels {
        for topic in &label.topics {
            *topic_counts.entry(topic.as_str()).or_insert(0) += 1;
        }
    }
    let topic_diversity = if brand_labels.is_empty() {
        0.0
    } else {
        topic_counts.len() as f64 / brand_labels.len() as f64
    };
    out.push(Signal::new(
        format!("audience:topic_diversity:{}", target_brand),
        Dimension::Audience,
        target_brand.to_string(),
        format!("{} covers {} distinct topics across its ads (diversity ratio {:.2})", target_brand, topic_counts.len(), topic_diversity),
        0.5,
        topic_diversity.min(1.0),
        0.3,
        vec![],
    ));

    let angle_shares = proportions(brand_labels.iter().flat_map(|l| l.angles.iter().map(|a| format!("{:?}", a.kind))));
    let angle_balance = 1.0 - herfindahl(angle_shares.values().copied());
    out.push(Signal::new(
        format!("audience:angle_mix_balance:{}", target_brand),
        Dimension::Audience,
        target_brand.to_string(),
        format!("{}'s messaging-angle mix balance score is {:.2}", target_brand, angle_balance),
        0.5,
        angle_balance,
        0.3,
        vec![],
    ));

    out
}

// ---------------------------------------------------------------------
// Visual dimension
// ---------------------------------------------------------------------

fn visual_signals(rows: &[VisualIntelligence], ads: &[Ad], target_brand: &str) -> Vec<Signal> {
    let target_set: std::collections::HashSet<&str> = ads
        .iter()
        .filter(|a| a.brand == target_brand)
        .map(|a| a.ad_id.as_str())
        .collect();
    let brand_rows: Vec<&VisualIntelligence> = rows.iter().filter(|r| target_set.contains(r.ad_id.as_str())).collect();
    if brand_rows.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let misaligned = brand_rows
        .iter()
        .filter(|r| r.visual_text_alignment != VisualTextAlignment::Aligned)
        .count();
    let misalignment_rate = misaligned as f64 / brand_rows.len() as f64;
    if misalignment_rate >= 0.3 {
        out.push(Signal::new(
            format!("visual:misalignment:{}", target_brand),
            Dimension::Visual,
            target_brand.to_string(),
            format!("{:.0}% of {}'s sampled creative has visual/text misalignment", misalignment_rate * 100.0, target_brand),
            0.6,
            misalignment_rate,
            0.6,
            vec![],
        ));
    }

    let high_fatigue = brand_rows
        .iter()
        .filter(|r| matches!(r.creative_fatigue_risk, crate::data_models::visual::VisualFatigueRisk::High))
        .count();
    let fatigue_concentration = high_fatigue as f64 / brand_rows.len() as f64;
    if fatigue_concentration >= 0.3 {
        out.push(Signal::new(
            format!("visual:fatigue_concentration:{}", target_brand),
            Dimension::Visual,
            target_brand.to_string(),
            format!("{:.0}% of {}'s sampled creative is flagged high visual fatigue risk", fatigue_concentration * 100.0, target_brand),
            0.65,
            fatigue_concentration,
            0.7,
            vec![],
        ));
    }

    let mean_differentiation = brand_rows.iter().map(|r| r.differentiation).sum::<f64>() / brand_rows.len() as f64;
    out.push(Signal::new(
        format!("visual:differentiation:{}", target_brand),
        Dimension::Visual,
        target_brand.to_string(),
        format!("{}'s average visual differentiation score is {:.2}", target_brand, mean_differentiation),
        0.5,
        mean_differentiation,
        0.4,
        vec![],
    ));

    out
}

// ---------------------------------------------------------------------
// Whitespace dimension
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellClassification {
    VirginTerritory,
    Monopoly,
    Underserved,
    Competitive,
}

fn classify_cell(competitor_count: usize, mean_intensity: f64) -> CellClassification {
    if competitor_count == 0 {
        CellClassification::VirginTerritory
    } else if competitor_count == 1 {
        CellClassification::Monopoly
    } else if competitor_count <= 3 && mean_intensity < 0.5 {
        CellClassification::Underserved
    } else {
        CellClassification::Competitive
    }
}

fn whitespace_signals(ads: &[Ad], labels: &HashMap<String, StrategicLabel>) -> Vec<Signal> {
    struct Cell {
        brands: std::collections::HashSet<String>,
        volume: usize,
        intensity_sum: f64,
        intensity_n: usize,
    }

    let mut cells: HashMap<String, Cell> = HashMap::new();
    for ad in ads {
        let label = match labels.get(&ad.ad_id) {
            Some(l) => l,
            None => continue,
        };
        let angle_key = label
            .angles
            .first()
            .map(|a| format!("{:?}", a.kind))
            .unwrap_or_else(|| "NONE".to_string());
        let persona_key = label.persona.clone().unwrap_or_else(|| "unknown".to_string());
        let key = format!("{}|{:?}|{}", angle_key, label.funnel, persona_key);

        let cell = cells.entry(key).or_insert_with(|| Cell {
            brands: std::collections::HashSet::new(),
            volume: 0,
            intensity_sum: 0.0,
            intensity_n: 0,
        });
        cell.brands.insert(ad.brand.clone());
        cell.volume += 1;
        cell.intensity_sum += label.promotional_intensity;
        cell.intensity_n += 1;
    }

    const OPPORTUNITY_FLOOR: f64 = 0.4;
    let mut out = Vec::new();
    for (key, cell) in cells {
        let competitor_count = cell.brands.len();
        let mean_intensity = if cell.intensity_n > 0 { cell.intensity_sum / cell.intensity_n as f64 } else { 0.0 };
        let classification = classify_cell(competitor_count, mean_intensity);
        if classification == CellClassification::Competitive {
            continue;
        }
        let concentration = if competitor_count > 0 { 1.0 / competitor_count as f64 } else { 0.0 };
        let opportunity = (1.0 - concentration) * (1.0 - (competitor_count as f64 / 10.0).min(1.0));
        if opportunity < OPPORTUNITY_FLOOR && classification != CellClassification::VirginTerritory {
            continue;
        }
        let label_text = match classification {
            CellClassification::VirginTerritory => "virgin territory: no ads found in this angle/funnel/persona cell",
            CellClassification::Monopoly => "monopoly: a single brand owns this angle/funnel/persona cell",
            CellClassification::Underserved => "underserved: few competitors and low promotional intensity in this cell",
            CellClassification::Competitive => unreachable!(),
        };
        out.push(Signal::new(
            format!("whitespace:{}", key),
            Dimension::Whitespace,
            key.clone(),
            format!("{} ({}, {} ads, {} competitor(s))", label_text, key, cell.volume, competitor_count),
            0.55,
            opportunity.max(0.2),
            0.6,
            vec![],
        ));
    }
    out
}

// ---------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceArtifact {
    pub signals: Vec<Signal>,
}

pub struct IntelligenceStage;

impl IntelligenceStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IntelligenceStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for IntelligenceStage {
    fn name(&self) -> &'static str {
        "multi_dimensional_intelligence"
    }

    async fn run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let store = ArtifactStore::for_run(ctx);
        let ingestion: IngestionArtifact = store
            .read(ingestion::ARTIFACT_KIND, ctx.run_id.as_str())?
            .ok_or_else(|| PipelineError::schema_drift(ingestion::ARTIFACT_KIND, "ads"))?;
        let labeling: LabelingArtifact = store
            .read(labeling::ARTIFACT_KIND, ctx.run_id.as_str())?
            .unwrap_or(LabelingArtifact { labels: vec![], degraded: false });
        let visual: VisualIntelligenceArtifact = store
            .read(visual::ARTIFACT_KIND, ctx.run_id.as_str())?
            .unwrap_or(VisualIntelligenceArtifact {
                rows: vec![],
                sampled_ad_ids: vec![],
                degraded: false,
                requested_quota: Default::default(),
                granted_quota: Default::default(),
            });
        let strategic_analysis: SimilarityArtifact = store
            .read(analysis::SIMILARITY_ARTIFACT_KIND, ctx.run_id.as_str())?
            .ok_or_else(|| PipelineError::schema_drift(analysis::SIMILARITY_ARTIFACT_KIND, "current_state"))?;

        let labels_by_ad: HashMap<String, StrategicLabel> =
            labeling.labels.into_iter().map(|l| (l.ad_id.clone(), l)).collect();

        let mut signals = Vec::new();
        signals.extend(competitive_signals(&strategic_analysis, &ctx.target_brand));
        signals.extend(creative_signals(&ingestion.ads, &labels_by_ad, &ctx.target_brand));
        signals.extend(channel_signals(&strategic_analysis, &ctx.target_brand));
        signals.extend(audience_signals(&labels_by_ad, &ingestion.ads, &ctx.target_brand));
        signals.extend(visual_signals(&visual.rows, &ingestion.ads, &ctx.target_brand));
        signals.extend(whitespace_signals(&ingestion.ads, &labels_by_ad));

        let signals = dedupe_signals(signals);

        let artifact_name = ctx.artifact_name(ARTIFACT_KIND);
        let artifact = IntelligenceArtifact { signals };
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
    fn herfindahl_is_one_for_single_holder() {
        assert_eq!(herfindahl(vec![1.0].into_iter()), 1.0);
    }

    #[test]
    fn herfindahl_is_low_for_even_split() {
        let shares = vec![0.25, 0.25, 0.25, 0.25];
        assert!((herfindahl(shares.into_iter()) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn cell_classification_rules() {
        assert_eq!(classify_cell(0, 0.0), CellClassification::VirginTerritory);
        assert_eq!(classify_cell(1, 0.9), CellClassification::Monopoly);
        assert_eq!(classify_cell(2, 0.2), CellClassification::Underserved);
        assert_eq!(classify_cell(5, 0.9), CellClassification::Competitive);
    }
}
