use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::contracts::{PipelineError, PipelineResult};
use crate::data_models::ad::{Ad, MediaType};
use crate::data_models::embedding::Embedding;
use crate::data_models::label::{Funnel, StrategicLabel};
use crate::data_models::similarity::SimilarityEdge;
use crate::run_context::RunContext;

use super::artifact_store::ArtifactStore;
use super::connectors::{AiWarehouse, ForecastPoint};
use super::embeddings::{self, EmbeddingsArtifact};
use super::ingestion::{self, IngestionArtifact};
use super::labeling::{self, LabelingArtifact};
use super::stage::{Stage, StageOutcome};

pub const SIMILARITY_ARTIFACT_KIND: &str = "similarity_edges";
pub const FATIGUE_ARTIFACT_KIND: &str = "creative_fatigue";
pub const FORECAST_ARTIFACT_KIND: &str = "forecasts";
pub const CTA_ARTIFACT_KIND: &str = "cta_aggressiveness";

// ---------------------------------------------------------------------
// Current state
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentStateRow {
    pub brand: String,
    pub mean_promotional_intensity: f64,
    pub mean_urgency_score: f64,
    pub funnel_mix: HashMap<String, f64>,
    pub media_type_distribution: HashMap<String, f64>,
    pub platform_distribution: HashMap<String, f64>,
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

pub fn compute_current_state(
    ads: &[Ad],
    labels: &HashMap<String, StrategicLabel>,
    lookback_days: i64,
    now: DateTime<Utc>,
) -> Vec<CurrentStateRow> {
    let window_start = now - chrono::Duration::days(lookback_days);
    let mut by_brand: HashMap<&str, Vec<&Ad>> = HashMap::new();
    for ad in ads {
        if ad.start_ts >= window_start {
            by_brand.entry(ad.brand.as_str()).or_default().push(ad);
        }
    }

    let mut out = Vec::new();
    for (brand, brand_ads) in by_brand {
        let labeled: Vec<&StrategicLabel> =
            brand_ads.iter().filter_map(|a| labels.get(&a.ad_id)).collect();
        let mean_promotional_intensity = if labeled.is_empty() {
            0.0
        } else {
            labeled.iter().map(|l| l.promotional_intensity).sum::<f64>() / labeled.len() as f64
        };
        let mean_urgency_score = if labeled.is_empty() {
            0.0
        } else {
            labeled.iter().map(|l| l.urgency_score).sum::<f64>() / labeled.len() as f64
        };
        let funnel_mix = proportions(labeled.iter().map(|l| format!("{:?}", l.funnel)));
        let media_type_distribution = proportions(brand_ads.iter().map(|a| format!("{:?}", a.media_type)));
        let platform_distribution = proportions(
            brand_ads.iter().flat_map(|a| a.publisher_platforms.iter().cloned()),
        );

        out.push(CurrentStateRow {
            brand: brand.to_string(),
            mean_promotional_intensity,
            mean_urgency_score,
            funnel_mix,
            media_type_distribution,
            platform_distribution,
        });
    }
    out.sort_by(|a, b| a.brand.cmp(&b.brand));
    out
}

// ---------------------------------------------------------------------
// Copying / similarity detection
// ---------------------------------------------------------------------

pub fn detect_similarity_edges(
    ads: &[Ad],
    embeddings_by_ad: &HashMap<String, Vec<f32>>,
    cosine_threshold: f64,
    lag_days_max: i64,
) -> Vec<SimilarityEdge> {
    let mut edges = Vec::new();
    for (i, x) in ads.iter().enumerate() {
        for y in ads.iter().skip(i + 1) {
            if x.brand == y.brand {
                continue;
            }
            // Earlier ad is the "source", later one the "copier". Ties keep
            // iteration order (x before y) as the direction.
            let (a, b) = if x.start_ts <= y.start_ts { (x, y) } else { (y, x) };
            let lag_days = (b.start_ts - a.start_ts).num_days();
            if lag_days > lag_days_max {
                continue;
            }
            let (vec_a, vec_b) = match (embeddings_by_ad.get(&a.ad_id), embeddings_by_ad.get(&b.ad_id)) {
                (Some(va), Some(vb)) => (va, vb),
                _ => continue,
            };
            let distance = Embedding::cosine_distance(vec_a, vec_b);
            if distance < cosine_threshold {
                edges.push(SimilarityEdge {
                    ad_a_id: a.ad_id.clone(),
                    ad_b_id: b.ad_id.clone(),
                    source_brand: a.brand.clone(),
                    copier_brand: b.brand.clone(),
                    cosine_distance: distance,
                    lag_days,
                    confidence: SimilarityEdge::confidence_from_distance(distance),
                });
            }
        }
    }
    edges.sort_by(|x, y| {
        y.confidence
            .partial_cmp(&x.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| x.ad_a_id.cmp(&y.ad_a_id))
            .then_with(|| x.ad_b_id.cmp(&y.ad_b_id))
    });
    edges
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityAggregate {
    pub source_brand: String,
    pub copier_brand: String,
    pub max_similarity: f64,
    pub mean_similarity: f64,
    pub edge_count: usize,
}

pub fn aggregate_similarity(edges: &[SimilarityEdge]) -> Vec<SimilarityAggregate> {
    let mut groups: HashMap<(String, String), Vec<f64>> = HashMap::new();
    for edge in edges {
        let similarity = 1.0 - edge.cosine_distance;
        groups
            .entry((edge.source_brand.clone(), edge.copier_brand.clone()))
            .or_default()
            .push(similarity);
    }
    let mut out: Vec<SimilarityAggregate> = groups
        .into_iter()
        .map(|((source_brand, copier_brand), sims)| SimilarityAggregate {
            max_similarity: sims.iter().cloned().fold(f64::MIN, f64::max),
            mean_similarity: sims.iter().sum::<f64>() / sims.len() as f64,
            edge_count: sims.len(),
            source_brand,
            copier_brand,
        })
        .collect();
    out.sort_by(|a, b| b.max_similarity.partial_cmp(&a.max_similarity).unwrap_or(std::cmp::Ordering::Equal));
    out
}

// ---------------------------------------------------------------------
// Creative fatigue
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FatigueLevel {
    Critical,
    High,
    Moderate,
    Low,
    Fresh,
}

impl FatigueLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            FatigueLevel::Critical
        } else if score >= 0.6 {
            FatigueLevel::High
        } else if score >= 0.4 {
            FatigueLevel::Moderate
        } else if score >= 0.2 {
            FatigueLevel::Low
        } else {
            FatigueLevel::Fresh
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatigueRow {
    pub ad_id: String,
    pub cell_key: String,
    pub originality: f64,
    pub days_since_launch: i64,
    pub refresh_count: u32,
    pub fatigue_score: f64,
    pub level: FatigueLevel,
}

/// Piecewise fatigue rule; branches tested in the order given in the design
/// notes, first match wins, every branch bounded to `[0,1]`. Boundaries are
/// fixed inclusive on the lower bound throughout (the open question on
/// branch inclusivity resolved uniformly this way).
pub fn fatigue_score(originality: f64, days_since_launch: i64, refresh_count: u32) -> f64 {
    let days = days_since_launch as f64;
    let raw = if originality < 0.4 && refresh_count > 0 {
        0.8 + 0.04 * refresh_count as f64
    } else if originality < 0.5 && days_since_launch > 21 {
        0.6 + (days / 300.0)
    } else if originality < 0.7 && days_since_launch > 14 {
        0.3 + (days / 300.0)
    } else {
        days / 90.0
    };
    raw.clamp(0.0, 1.0)
}

fn cell_key(funnel: Funnel, persona: &str, page_category: &str) -> String {
    format!("{:?}|{}|{}", funnel, persona, page_category)
}

pub fn compute_fatigue(
    ads: &[Ad],
    labels: &HashMap<String, StrategicLabel>,
    similarity_edges: &[SimilarityEdge],
    target_brand: &str,
    now: DateTime<Utc>,
) -> Vec<FatigueRow> {
    let window_start = now - chrono::Duration::days(30);
    let target_ads: Vec<&Ad> = ads
        .iter()
        .filter(|a| a.brand == target_brand && a.start_ts >= window_start)
        .collect();

    // mean cross-competitor influence per ad = mean confidence of similarity
    // edges where this ad is the copier.
    let mut influence_by_ad: HashMap<&str, Vec<f64>> = HashMap::new();
    for edge in similarity_edges {
        if edge.copier_brand == target_brand {
            influence_by_ad.entry(edge.ad_b_id.as_str()).or_default().push(edge.confidence);
        }
    }

    let mut by_cell: HashMap<String, Vec<&Ad>> = HashMap::new();
    for ad in &target_ads {
        let label = labels.get(&ad.ad_id);
        let funnel = label.map(|l| l.funnel).unwrap_or(Funnel::Mid);
        let persona = label.and_then(|l| l.persona.clone()).unwrap_or_else(|| "unknown".to_string());
        let category = ad.page_category.clone().unwrap_or_else(|| "unknown".to_string());
        by_cell.entry(cell_key(funnel, &persona, &category)).or_default().push(ad);
    }

    let mut out = Vec::new();
    for (key, cell_ads) in &by_cell {
        let influences: Vec<f64> = cell_ads
            .iter()
            .flat_map(|ad| influence_by_ad.get(ad.ad_id.as_str()).cloned().unwrap_or_default())
            .collect();
        let originality = if influences.is_empty() {
            1.0
        } else {
            1.0 - influences.iter().sum::<f64>() / influences.len() as f64
        };

        let refresh_signals: Vec<&&Ad> = cell_ads
            .iter()
            .filter(|ad| originality >= 0.6 && ad.active_days >= 7 && (now - ad.start_ts).num_days() <= 14)
            .collect();

        for ad in cell_ads {
            let days_since_launch = (now - ad.start_ts).num_days().max(0);
            let refresh_count = refresh_signals
                .iter()
                .filter(|r| r.start_ts > ad.start_ts)
                .count() as u32;
            let score = fatigue_score(originality, days_since_launch, refresh_count);
            out.push(FatigueRow {
                ad_id: ad.ad_id.clone(),
                cell_key: key.clone(),
                originality,
                days_since_launch,
                refresh_count,
                fatigue_score: score,
                level: FatigueLevel::from_score(score),
            });
        }
    }
    out.sort_by(|a, b| a.ad_id.cmp(&b.ad_id));
    out
}

// ---------------------------------------------------------------------
// CTA aggressiveness
// ---------------------------------------------------------------------

static URGENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(today|now|hurry|limited time|last chance|ends soon)\b").unwrap());
static PROMOTIONAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(sale|free|deal|discount|save|off)\b").unwrap());
static SCARCITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(only \d+ left|while supplies last|limited stock|selling out)\b").unwrap());
static DISCOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2})\s*%\s*off").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CtaBucket {
    BrandFocused,
    ModeratelyAggressive,
    HighlyAggressive,
}

impl CtaBucket {
    pub fn from_score(score: f64) -> Self {
        if score < 3.5 {
            CtaBucket::BrandFocused
        } else if score < 7.0 {
            CtaBucket::ModeratelyAggressive
        } else {
            CtaBucket::HighlyAggressive
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtaRow {
    pub ad_id: String,
    pub score: f64,
    pub bucket: CtaBucket,
    pub discount_pct: Option<u32>,
}

/// Extracts the max single integer in `[5,90]` from phrases like "50% off".
pub fn extract_discount_pct(text: &str) -> Option<u32> {
    DISCOUNT_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
        .filter(|pct| (5..=90).contains(pct))
        .max()
}

pub fn cta_aggressiveness(text: &str) -> CtaRow {
    let urgency_hits = URGENCY_RE.find_iter(text).count();
    let promo_hits = PROMOTIONAL_RE.find_iter(text).count();
    let scarcity_hits = SCARCITY_RE.find_iter(text).count();
    let discount_pct = extract_discount_pct(text);
    let discount_component = discount_pct.map(|p| p as f64 / 10.0).unwrap_or(0.0);
    let score = (urgency_hits as f64 * 2.0
        + promo_hits as f64 * 1.5
        + scarcity_hits as f64 * 2.5
        + discount_component)
        .min(10.0);
    CtaRow {
        ad_id: String::new(),
        score,
        bucket: CtaBucket::from_score(score),
        discount_pct,
    }
}

// ---------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResult {
    pub brand: String,
    pub metric: String,
    pub points: Vec<ForecastPointDto>,
    pub low_confidence: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPointDto {
    pub week_index: u32,
    pub point: f64,
    pub low80: f64,
    pub high80: f64,
    pub low95: f64,
    pub high95: f64,
}

impl From<ForecastPoint> for ForecastPointDto {
    fn from(p: ForecastPoint) -> Self {
        Self { week_index: p.week_index, point: p.point, low80: p.low80, high80: p.high80, low95: p.low95, high95: p.high95 }
    }
}

/// Buckets a brand's in-window ads into one of `ceil(lookback_days/7)` weekly
/// slots by `start_ts`, oldest week first.
fn weekly_buckets(ads: &[Ad], brand: &str, lookback_days: i64, now: DateTime<Utc>) -> (Vec<&Ad>, i64, DateTime<Utc>) {
    let window_start = now - chrono::Duration::days(lookback_days);
    let weeks = ((lookback_days as f64) / 7.0).ceil() as i64;
    let brand_ads: Vec<&Ad> = ads.iter().filter(|a| a.brand == brand && a.start_ts >= window_start).collect();
    (brand_ads, weeks.max(1), window_start)
}

/// Weekly ad-volume series for a brand over the trailing window, oldest week
/// first, used as one of the forecasting model's input histories.
pub fn weekly_ad_counts(ads: &[Ad], brand: &str, lookback_days: i64, now: DateTime<Utc>) -> Vec<f64> {
    let (brand_ads, weeks, window_start) = weekly_buckets(ads, brand, lookback_days, now);
    let mut buckets = vec![0.0_f64; weeks as usize];
    for ad in brand_ads {
        let days_from_start = (ad.start_ts - window_start).num_days();
        let week_idx = (days_from_start / 7).clamp(0, weeks - 1) as usize;
        buckets[week_idx] += 1.0;
    }
    buckets
}

/// Weekly mean `promotional_intensity` series for a brand's labeled ads;
/// weeks with no labeled ads are 0.0.
pub fn weekly_mean_promotional_intensity(
    ads: &[Ad],
    labels: &HashMap<String, StrategicLabel>,
    brand: &str,
    lookback_days: i64,
    now: DateTime<Utc>,
) -> Vec<f64> {
    let (brand_ads, weeks, window_start) = weekly_buckets(ads, brand, lookback_days, now);
    let mut sums = vec![0.0_f64; weeks as usize];
    let mut counts = vec![0usize; weeks as usize];
    for ad in brand_ads {
        let Some(label) = labels.get(&ad.ad_id) else { continue };
        let days_from_start = (ad.start_ts - window_start).num_days();
        let week_idx = (days_from_start / 7).clamp(0, weeks - 1) as usize;
        sums[week_idx] += label.promotional_intensity;
        counts[week_idx] += 1;
    }
    sums.iter().zip(&counts).map(|(s, c)| if *c > 0 { s / *c as f64 } else { 0.0 }).collect()
}

/// Weekly percentage of a brand's ads running on more than one publisher
/// platform at once, in `[0,100]`.
pub fn weekly_cross_platform_pct(ads: &[Ad], brand: &str, lookback_days: i64, now: DateTime<Utc>) -> Vec<f64> {
    let (brand_ads, weeks, window_start) = weekly_buckets(ads, brand, lookback_days, now);
    let mut multi = vec![0usize; weeks as usize];
    let mut total = vec![0usize; weeks as usize];
    for ad in brand_ads {
        let days_from_start = (ad.start_ts - window_start).num_days();
        let week_idx = (days_from_start / 7).clamp(0, weeks - 1) as usize;
        total[week_idx] += 1;
        if ad.publisher_platforms.len() > 1 {
            multi[week_idx] += 1;
        }
    }
    multi.iter().zip(&total).map(|(m, t)| if *t > 0 { *m as f64 / *t as f64 * 100.0 } else { 0.0 }).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityArtifact {
    pub current_state: Vec<CurrentStateRow>,
    pub similarity_edges: Vec<SimilarityEdge>,
    pub similarity_aggregates: Vec<SimilarityAggregate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatigueArtifact {
    pub fatigue: Vec<FatigueRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtaArtifact {
    pub cta: Vec<CtaRow>,
    pub cta_by_brand: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastArtifact {
    pub forecasts: Vec<ForecastResult>,
}

pub struct AnalysisStage {
    pub warehouse: Arc<dyn AiWarehouse>,
}

impl AnalysisStage {
    pub fn new(warehouse: Arc<dyn AiWarehouse>) -> Self {
        Self { warehouse }
    }
}

#[async_trait]
impl Stage for AnalysisStage {
    fn name(&self) -> &'static str {
        "strategic_analysis"
    }

    async fn run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let store = ArtifactStore::for_run(ctx);
        let ingestion: IngestionArtifact = store
            .read(ingestion::ARTIFACT_KIND, ctx.run_id.as_str())?
            .ok_or_else(|| PipelineError::schema_drift(ingestion::ARTIFACT_KIND, "ads"))?;
        let labeling: LabelingArtifact = store
            .read(labeling::ARTIFACT_KIND, ctx.run_id.as_str())?
            .unwrap_or(LabelingArtifact { labels: vec![], degraded: false });
        let embeddings: EmbeddingsArtifact = store
            .read(embeddings::ARTIFACT_KIND, ctx.run_id.as_str())?
            .unwrap_or(EmbeddingsArtifact { embeddings: vec![], skipped_ad_ids: vec![] });

        let labels_by_ad: HashMap<String, StrategicLabel> =
            labeling.labels.into_iter().map(|l| (l.ad_id.clone(), l)).collect();
        let embeddings_by_ad: HashMap<String, Vec<f32>> =
            embeddings.embeddings.into_iter().map(|e| (e.ad_id.clone(), e.vector)).collect();

        let now = Utc::now();
        let current_state = compute_current_state(&ingestion.ads, &labels_by_ad, ctx.config.forecast_lookback_days, now);

        let similarity_edges = detect_similarity_edges(
            &ingestion.ads,
            &embeddings_by_ad,
            ctx.config.similarity_cosine_threshold,
            ctx.config.similarity_lag_days_max,
        );
        let similarity_aggregates = aggregate_similarity(&similarity_edges);

        let fatigue = compute_fatigue(&ingestion.ads, &labels_by_ad, &similarity_edges, &ctx.target_brand, now);

        let mut cta = Vec::with_capacity(ingestion.ads.len());
        let mut cta_sum: HashMap<String, (f64, usize)> = HashMap::new();
        for ad in &ingestion.ads {
            let mut row = cta_aggressiveness(&ad.creative_text);
            row.ad_id = ad.ad_id.clone();
            let entry = cta_sum.entry(ad.brand.clone()).or_insert((0.0, 0));
            entry.0 += row.score;
            entry.1 += 1;
            cta.push(row);
        }
        let cta_by_brand: HashMap<String, f64> =
            cta_sum.into_iter().map(|(brand, (sum, n))| (brand, if n > 0 { sum / n as f64 } else { 0.0 })).collect();

        let mut brands: Vec<String> = ingestion.ads.iter().map(|a| a.brand.clone()).collect();
        brands.sort();
        brands.dedup();
        let metric_series: [(&str, fn(&[Ad], &HashMap<String, StrategicLabel>, &str, i64, DateTime<Utc>) -> Vec<f64>); 3] = [
            ("weekly_ad_volume", |ads, _labels, brand, lookback, now| weekly_ad_counts(ads, brand, lookback, now)),
            ("mean_promotional_intensity", weekly_mean_promotional_intensity),
            ("cross_platform_pct", |ads, _labels, brand, lookback, now| weekly_cross_platform_pct(ads, brand, lookback, now)),
        ];
        let mut forecasts = Vec::with_capacity(brands.len() * metric_series.len());
        for brand in &brands {
            for (metric, series_fn) in &metric_series {
                let history = series_fn(&ingestion.ads, &labels_by_ad, brand, ctx.config.forecast_lookback_days, now);
                let observed_points = history.iter().filter(|v| **v > 0.0).count();
                let points = self
                    .warehouse
                    .forecast_weekly(&history, ctx.config.forecast_horizon_weeks)
                    .await?;
                forecasts.push(ForecastResult {
                    brand: brand.clone(),
                    metric: metric.to_string(),
                    points: points.into_iter().map(ForecastPointDto::from).collect(),
                    low_confidence: observed_points < 8,
                });
            }
        }

        let similarity_name = ctx.artifact_name(SIMILARITY_ARTIFACT_KIND);
        let fatigue_name = ctx.artifact_name(FATIGUE_ARTIFACT_KIND);
        let cta_name = ctx.artifact_name(CTA_ARTIFACT_KIND);
        let forecast_name = ctx.artifact_name(FORECAST_ARTIFACT_KIND);

        store.write(
            SIMILARITY_ARTIFACT_KIND,
            ctx.run_id.as_str(),
            &SimilarityArtifact { current_state, similarity_edges, similarity_aggregates },
        )?;
        store.write(FATIGUE_ARTIFACT_KIND, ctx.run_id.as_str(), &FatigueArtifact { fatigue })?;
        store.write(CTA_ARTIFACT_KIND, ctx.run_id.as_str(), &CtaArtifact { cta, cta_by_brand })?;
        store.write(FORECAST_ARTIFACT_KIND, ctx.run_id.as_str(), &ForecastArtifact { forecasts })?;

        Ok(StageOutcome::ok(vec![similarity_name, fatigue_name, cta_name, forecast_name]))
    }

    async fn dry_run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        ctx.progress.emit(crate::run_context::ProgressEvent::Note {
            stage: self.name().to_string(),
            message: format!(
                "would plan artifacts {}, {}, {}, {}",
                ctx.artifact_name(SIMILARITY_ARTIFACT_KIND),
                ctx.artifact_name(FATIGUE_ARTIFACT_KIND),
                ctx.artifact_name(CTA_ARTIFACT_KIND),
                ctx.artifact_name(FORECAST_ARTIFACT_KIND),
            ),
        });
        Ok(StageOutcome::ok(vec![]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fatigue_branches_stay_within_unit_range() {
        for originality in [0.1, 0.3, 0.45, 0.6, 0.9] {
            for days in [0, 10, 20, 30, 90, 400] {
                for refresh in [0, 1, 5] {
                    let score = fatigue_score(originality, days, refresh);
                    assert!((0.0..=1.0).contains(&score), "out of range: {}", score);
                }
            }
        }
    }

    #[test]
    fn fatigue_is_nondecreasing_in_days_within_fresh_branch() {
        let a = fatigue_score(0.9, 10, 0);
        let b = fatigue_score(0.9, 20, 0);
        assert!(b >= a);
    }

    #[test]
    fn copying_detection_scenario_produces_single_directional_edge() {
        let start_a = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let start_b = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap();
        let ad_a = Ad {
            ad_id: "a".into(), brand: "X".into(), creative_text: "Get 50% off today only!".into(),
            media_type: MediaType::Image, primary_visual_uri: None, visual_uris: vec![], card_count: 1,
            start_ts: start_a, end_ts: None, active_days: 10,
            publisher_platforms: Default::default(), page_category: None, degraded: false,
        };
        let ad_b = Ad {
            ad_id: "b".into(), brand: "Y".into(), creative_text: "Save 50% — today only!".into(),
            media_type: MediaType::Image, primary_visual_uri: None, visual_uris: vec![], card_count: 1,
            start_ts: start_b, end_ts: None, active_days: 10,
            publisher_platforms: Default::default(), page_category: None, degraded: false,
        };
        let mut embeddings = HashMap::new();
        embeddings.insert("a".to_string(), vec![1.0_f32, 0.0, 0.0]);
        embeddings.insert("b".to_string(), vec![0.99_f32, 0.01, 0.0]);
        let edges = detect_similarity_edges(&[ad_a, ad_b], &embeddings, 0.3, 14);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_brand, "X");
        assert_eq!(edges[0].copier_brand, "Y");
        assert_eq!(edges[0].lag_days, 2);
    }

    #[test]
    fn discount_extraction_picks_max_in_range() {
        assert_eq!(extract_discount_pct("Save 20% off, or up to 70% off storewide"), Some(70));
        assert_eq!(extract_discount_pct("99% off everything"), None);
    }

    #[test]
    fn cta_bucket_thresholds() {
        assert_eq!(CtaBucket::from_score(1.0), CtaBucket::BrandFocused);
        assert_eq!(CtaBucket::from_score(5.0), CtaBucket::ModeratelyAggressive);
        assert_eq!(CtaBucket::from_score(9.0), CtaBucket::HighlyAggressive);
    }

    fn ad_with(id: &str, days_ago: i64, platforms: &[&str]) -> Ad {
        Ad {
            ad_id: id.into(),
            brand: "X".into(),
            creative_text: String::new(),
            media_type: MediaType::Image,
            primary_visual_uri: None,
            visual_uris: vec![],
            card_count: 1,
            start_ts: Utc::now() - chrono::Duration::days(days_ago),
            end_ts: None,
            active_days: 5,
            publisher_platforms: platforms.iter().map(|p| p.to_string()).collect(),
            page_category: None,
            degraded: false,
        }
    }

    #[test]
    fn cross_platform_pct_counts_multi_platform_ads_only() {
        let ads = vec![
            ad_with("a", 1, &["facebook", "instagram"]),
            ad_with("b", 1, &["facebook"]),
        ];
        let pct = weekly_cross_platform_pct(&ads, "X", 7, Utc::now());
        assert_eq!(pct.iter().sum::<f64>(), 50.0);
    }

    #[test]
    fn mean_promotional_intensity_ignores_unlabeled_ads() {
        let ads = vec![ad_with("a", 1, &["facebook"]), ad_with("b", 1, &["facebook"])];
        let mut labels = HashMap::new();
        labels.insert(
            "a".to_string(),
            StrategicLabel {
                ad_id: "a".into(),
                funnel: Funnel::Mid,
                angles: vec![],
                angle_complexity: crate::data_models::label::AngleComplexity::NoAnglesDetected,
                persona: None,
                topics: Default::default(),
                urgency_score: 0.0,
                promotional_intensity: 0.8,
                brand_voice_score: 0.0,
                labeling_degraded: false,
            },
        );
        let series = weekly_mean_promotional_intensity(&ads, &labels, "X", 7, Utc::now());
        assert_eq!(series.iter().sum::<f64>(), 0.8);
    }
}
