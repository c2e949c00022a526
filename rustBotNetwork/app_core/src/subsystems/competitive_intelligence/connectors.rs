use std::collections::BTreeSet;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::contracts::{PipelineError, PipelineResult};
use crate::data_models::competitor::CompetitorTier;
use crate::data_models::label::{AngleAssignment, AngleKind, Funnel};
use crate::data_models::visual::{VisualFatigueRisk, VisualTextAlignment};

/// Deterministic seed derivation shared by every simulated collaborator:
/// hash the caller-chosen key material into a u64 seed for `ChaCha8Rng`, so
/// reruns with the same run id and the same inputs are byte-identical.
fn derive_seed(parts: &[&str]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[0..8].try_into().expect("sha256 digest is >= 8 bytes"))
}

fn rng_for(parts: &[&str]) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(derive_seed(parts))
}

// ---------------------------------------------------------------------
// Web search provider
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub rank: u32,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> PipelineResult<Vec<SearchResult>>;
}

/// Deterministic stand-in for a web-search API. Produces a name bank seeded
/// by the query text so Discovery has stable, reproducible input without a
/// network call, per the `dry_run` and test requirements.
pub struct SimulatedSearchProvider {
    pub quota_exhausted: bool,
}

impl SimulatedSearchProvider {
    pub fn new() -> Self {
        Self { quota_exhausted: false }
    }
}

impl Default for SimulatedSearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

const NAME_BANK: &[&str] = &[
    "Northwind", "Solara", "Brightline", "Lumen", "Cobalt", "Vantage", "Ridgeback",
    "Meridian", "Aurelia", "Fernway", "Glacier", "Halcyon", "Ironclad", "Juniper",
    "Kestrel", "Lantern", "Mosaic", "Novara", "Outrider", "Pinecrest", "Quartzite",
    "Redwood", "Sablewood", "Tidewater", "Umberline", "Vireo", "Westmark", "Yonder",
    "Zephyrine", "Anvilcrest",
];

#[async_trait]
impl SearchProvider for SimulatedSearchProvider {
    async fn search(&self, query: &str, max_results: u32) -> PipelineResult<Vec<SearchResult>> {
        if self.quota_exhausted {
            return Err(PipelineError::upstream_quota(format!(
                "search quota exceeded for query '{}'",
                query
            )));
        }
        let mut rng = rng_for(&["search", query]);
        let n = max_results.min(NAME_BANK.len() as u32);
        let mut indices: Vec<usize> = (0..NAME_BANK.len()).collect();
        // Fisher-Yates over the deterministic RNG so result order is stable
        // for a given query but still varies across queries.
        for i in (1..indices.len()).rev() {
            let j = rng.gen_range(0..=i);
            indices.swap(i, j);
        }
        let results = indices
            .into_iter()
            .take(n as usize)
            .enumerate()
            .map(|(rank, idx)| SearchResult {
                title: format!("{} — {}", NAME_BANK[idx], query),
                url: format!("https://example.invalid/{}", NAME_BANK[idx].to_lowercase()),
                snippet: format!("{} is frequently mentioned alongside '{}'.", NAME_BANK[idx], query),
                rank: rank as u32,
            })
            .collect();
        Ok(results)
    }
}

// ---------------------------------------------------------------------
// Ad archive provider
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAdRecord {
    pub ad_archive_id: String,
    pub title: String,
    pub body: String,
    pub card_bodies: Vec<String>,
    pub card_image_urls: Vec<String>,
    pub card_video_preview_urls: Vec<String>,
    pub cta_text: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub publisher_platforms: Vec<String>,
    pub page_category: Option<String>,
}

#[async_trait]
pub trait AdArchiveProvider: Send + Sync {
    async fn probe(&self, brand: &str) -> PipelineResult<u64>;
    async fn fetch_ads(&self, brand: &str, window_days: i64) -> PipelineResult<Vec<RawAdRecord>>;
}

pub struct SimulatedAdArchiveProvider {
    pub unavailable: bool,
}

impl SimulatedAdArchiveProvider {
    pub fn new() -> Self {
        Self { unavailable: false }
    }
}

impl Default for SimulatedAdArchiveProvider {
    fn default() -> Self {
        Self::new()
    }
}

const PLATFORMS: &[&str] = &["facebook", "instagram", "audience_network", "messenger"];
const CATEGORIES: &[&str] = &["apparel", "home_goods", "electronics", "wellness"];

#[async_trait]
impl AdArchiveProvider for SimulatedAdArchiveProvider {
    async fn probe(&self, brand: &str) -> PipelineResult<u64> {
        if self.unavailable {
            return Err(PipelineError::upstream_unavailable(
                format!("ad archive unavailable for brand '{}'", brand),
                true,
            ));
        }
        let mut rng = rng_for(&["probe", brand]);
        Ok(rng.gen_range(0..=120))
    }

    async fn fetch_ads(&self, brand: &str, window_days: i64) -> PipelineResult<Vec<RawAdRecord>> {
        if self.unavailable {
            return Err(PipelineError::upstream_unavailable(
                format!("ad archive unavailable for brand '{}'", brand),
                true,
            ));
        }
        let mut rng = rng_for(&["fetch_ads", brand]);
        let count = rng.gen_range(3..=40);
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let card_count = rng.gen_range(0..=3);
            let card_bodies: Vec<String> = (0..card_count)
                .map(|c| format!("{} limited-time offer card {} for {}", brand, c, i))
                .collect();
            let has_image = rng.gen_bool(0.6);
            let has_video = rng.gen_bool(0.25);
            let card_image_urls: Vec<String> = if has_image {
                (0..=card_count.max(1))
                    .map(|c| format!("https://img.invalid/{}/{}_{}.png", brand, i, c))
                    .collect()
            } else {
                Vec::new()
            };
            let card_video_preview_urls: Vec<String> = if has_video {
                vec![format!("https://vid.invalid/{}/{}.mp4", brand, i)]
            } else {
                Vec::new()
            };
            let days_ago = rng.gen_range(0..=(window_days.max(1) as u32 + 30));
            let start_time = Some(
                (chrono::Utc::now() - chrono::Duration::days(days_ago as i64)).to_rfc3339(),
            );
            let active_span = rng.gen_range(0..=10u32);
            let end_time = if rng.gen_bool(0.5) {
                Some((chrono::Utc::now() - chrono::Duration::days((days_ago as i64 - active_span as i64).max(0))).to_rfc3339())
            } else {
                None
            };
            let pct_off = rng.gen_range(10..=70);
            out.push(RawAdRecord {
                ad_archive_id: format!("{}-{}", brand.to_lowercase().replace(' ', "-"), i),
                title: format!("{} Save {}% Today Only", brand, pct_off),
                body: format!("Don't miss out — {} is {}% off for a limited time!", brand, pct_off),
                card_bodies,
                card_image_urls,
                card_video_preview_urls,
                cta_text: "Shop Now".to_string(),
                start_time,
                end_time,
                publisher_platforms: {
                    let n = rng.gen_range(1..=PLATFORMS.len());
                    PLATFORMS.iter().take(n).map(|p| p.to_string()).collect()
                },
                page_category: CATEGORIES.get(rng.gen_range(0..CATEGORIES.len())).map(|s| s.to_string()),
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------
// Analytical warehouse AI primitives
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRound {
    MarketOverlap,
    CompetitivePositioning,
    BrandSimilarity,
}

#[derive(Debug, Clone)]
pub struct CompetitorValidationRow {
    pub name: String,
    pub is_competitor: bool,
    pub confidence: f64,
    pub tier: CompetitorTier,
    pub market_overlap_pct: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone)]
pub struct AdLabelRow {
    pub ad_id: String,
    pub funnel: Funnel,
    pub angles: Vec<AngleAssignment>,
    pub persona: Option<String>,
    pub topics: BTreeSet<String>,
    pub urgency_score: f64,
    pub promotional_intensity: f64,
    pub brand_voice_score: f64,
}

#[derive(Debug, Clone)]
pub struct VisualAnalysisRow {
    pub visual_text_alignment: VisualTextAlignment,
    pub visual_style: String,
    pub visual_focus: String,
    pub brand_consistency: f64,
    pub creative_fatigue_risk: VisualFatigueRisk,
    pub differentiation: f64,
}

#[derive(Debug, Clone)]
pub struct ForecastPoint {
    pub week_index: u32,
    pub point: f64,
    pub low80: f64,
    pub high80: f64,
    pub low95: f64,
    pub high95: f64,
}

#[async_trait]
pub trait AiWarehouse: Send + Sync {
    async fn validate_competitors(
        &self,
        candidate_names: &[String],
        round: ValidationRound,
    ) -> PipelineResult<Vec<CompetitorValidationRow>>;

    async fn label_ads(&self, ad_ids: &[String], texts: &[String]) -> PipelineResult<Vec<AdLabelRow>>;

    async fn embed_text(&self, text: &str) -> PipelineResult<Vec<f32>>;

    async fn analyze_visual(&self, image_uri: &str, prompt: &str) -> PipelineResult<VisualAnalysisRow>;

    async fn forecast_weekly(&self, history: &[f64], horizon_weeks: u32) -> PipelineResult<Vec<ForecastPoint>>;
}

pub struct SimulatedAiWarehouse;

impl SimulatedAiWarehouse {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SimulatedAiWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiWarehouse for SimulatedAiWarehouse {
    async fn validate_competitors(
        &self,
        candidate_names: &[String],
        round: ValidationRound,
    ) -> PipelineResult<Vec<CompetitorValidationRow>> {
        let round_tag = match round {
            ValidationRound::MarketOverlap => "market_overlap",
            ValidationRound::CompetitivePositioning => "competitive_positioning",
            ValidationRound::BrandSimilarity => "brand_similarity",
        };
        let mut out = Vec::with_capacity(candidate_names.len());
        for name in candidate_names {
            let mut rng = rng_for(&["validate", round_tag, name]);
            let draw: f64 = rng.gen_range(0.0..1.0);
            let is_competitor = draw > 0.35;
            let confidence = if is_competitor {
                rng.gen_range(0.55..=0.97)
            } else {
                rng.gen_range(0.5..=0.95)
            };
            let tiers = [
                CompetitorTier::Incumbent,
                CompetitorTier::Challenger,
                CompetitorTier::Niche,
                CompetitorTier::Emerging,
            ];
            let tier = tiers[rng.gen_range(0..tiers.len())];
            out.push(CompetitorValidationRow {
                name: name.clone(),
                is_competitor,
                confidence,
                tier,
                market_overlap_pct: rng.gen_range(0.0..=100.0),
                reasoning: format!("{} round assessed '{}' via simulated structured table", round_tag, name),
            });
        }
        Ok(out)
    }

    async fn label_ads(&self, ad_ids: &[String], texts: &[String]) -> PipelineResult<Vec<AdLabelRow>> {
        let kinds = [
            AngleKind::Promotional,
            AngleKind::Emotional,
            AngleKind::Rational,
            AngleKind::Urgency,
            AngleKind::Trust,
            AngleKind::SocialProof,
            AngleKind::Scarcity,
            AngleKind::BenefitFocused,
            AngleKind::FeatureFocused,
            AngleKind::Aspirational,
        ];
        let funnels = [Funnel::Upper, Funnel::Mid, Funnel::Lower];
        let mut out = Vec::with_capacity(ad_ids.len());
        for (ad_id, text) in ad_ids.iter().zip(texts.iter()) {
            let mut rng = rng_for(&["label", ad_id]);
            let lower = text.to_lowercase();
            let mut angles = Vec::new();
            if lower.contains('%') || lower.contains("off") || lower.contains("save") {
                angles.push(AngleAssignment { kind: AngleKind::Promotional, confidence: rng.gen_range(0.6..=0.95) });
            }
            if lower.contains("today") || lower.contains("now") || lower.contains("hurry") || lower.contains("limited") {
                angles.push(AngleAssignment { kind: AngleKind::Urgency, confidence: rng.gen_range(0.55..=0.9) });
            }
            if angles.is_empty() {
                // still give the simulator a chance to surface a low-confidence
                // angle so not every untagged ad is flagged NO_ANGLES_DETECTED.
                let idx = rng.gen_range(0..kinds.len());
                angles.push(AngleAssignment { kind: kinds[idx], confidence: rng.gen_range(0.2..=0.55) });
            }
            out.push(AdLabelRow {
                ad_id: ad_id.clone(),
                funnel: funnels[rng.gen_range(0..funnels.len())],
                angles,
                persona: Some(format!("persona_{}", rng.gen_range(0..5))),
                topics: {
                    let n = rng.gen_range(1..=3);
                    (0..n).map(|t| format!("topic_{}", t)).collect()
                },
                urgency_score: rng.gen_range(0.0..=1.0),
                promotional_intensity: rng.gen_range(0.0..=1.0),
                brand_voice_score: rng.gen_range(0.0..=1.0),
            });
        }
        Ok(out)
    }

    async fn embed_text(&self, text: &str) -> PipelineResult<Vec<f32>> {
        let mut rng = rng_for(&["embed", text]);
        let vector: Vec<f32> = (0..crate::data_models::embedding::EMBEDDING_DIMENSION)
            .map(|_| rng.gen_range(-1.0_f32..1.0_f32))
            .collect();
        Ok(vector)
    }

    async fn analyze_visual(&self, image_uri: &str, prompt: &str) -> PipelineResult<VisualAnalysisRow> {
        let mut rng = rng_for(&["visual", image_uri, prompt]);
        let alignments = [
            VisualTextAlignment::Aligned,
            VisualTextAlignment::Misaligned,
            VisualTextAlignment::Contradictory,
        ];
        let risks = [VisualFatigueRisk::Low, VisualFatigueRisk::Medium, VisualFatigueRisk::High];
        let styles = ["minimalist", "lifestyle", "product_hero", "bold_typography"];
        let foci = ["product", "person", "text_overlay", "scene"];
        Ok(VisualAnalysisRow {
            visual_text_alignment: alignments[rng.gen_range(0..alignments.len())],
            visual_style: styles[rng.gen_range(0..styles.len())].to_string(),
            visual_focus: foci[rng.gen_range(0..foci.len())].to_string(),
            brand_consistency: rng.gen_range(0.0..=1.0),
            creative_fatigue_risk: risks[rng.gen_range(0..risks.len())],
            differentiation: rng.gen_range(0.0..=1.0),
        })
    }

    async fn forecast_weekly(&self, history: &[f64], horizon_weeks: u32) -> PipelineResult<Vec<ForecastPoint>> {
        if history.is_empty() {
            return Err(PipelineError::validation("cannot forecast an empty history"));
        }
        let mean = history.iter().sum::<f64>() / history.len() as f64;
        let trend = if history.len() >= 2 {
            (history[history.len() - 1] - history[0]) / (history.len() as f64 - 1.0)
        } else {
            0.0
        };
        let mut rng = rng_for(&["forecast", &format!("{:?}", history)]);
        let mut out = Vec::with_capacity(horizon_weeks as usize);
        for week in 1..=horizon_weeks {
            let point = (mean + trend * week as f64).max(0.0);
            let jitter: f64 = rng.gen_range(0.05..=0.2) * point.max(1.0);
            out.push(ForecastPoint {
                week_index: week,
                point,
                low80: (point - jitter).max(0.0),
                high80: point + jitter,
                low95: (point - jitter * 1.6).max(0.0),
                high95: point + jitter * 1.6,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_search_is_deterministic_for_same_query() {
        let provider = SimulatedSearchProvider::new();
        let a = provider.search("eyewear brands", 10).await.unwrap();
        let b = provider.search("eyewear brands", 10).await.unwrap();
        assert_eq!(a.iter().map(|r| r.title.clone()).collect::<Vec<_>>(),
                   b.iter().map(|r| r.title.clone()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn simulated_search_quota_exhausted_errors() {
        let provider = SimulatedSearchProvider { quota_exhausted: true };
        let err = provider.search("x", 5).await.unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn simulated_archive_probe_is_deterministic() {
        let provider = SimulatedAdArchiveProvider::new();
        let a = provider.probe("Acme").await.unwrap();
        let b = provider.probe("Acme").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn simulated_embed_has_fixed_dimension() {
        let warehouse = SimulatedAiWarehouse::new();
        let v = warehouse.embed_text("Title: Sale | Action: Buy").await.unwrap();
        assert_eq!(v.len(), crate::data_models::embedding::EMBEDDING_DIMENSION);
    }

    #[tokio::test]
    async fn simulated_forecast_rejects_empty_history() {
        let warehouse = SimulatedAiWarehouse::new();
        assert!(warehouse.forecast_weekly(&[], 4).await.is_err());
    }
}
