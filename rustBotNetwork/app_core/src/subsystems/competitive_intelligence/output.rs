use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;

use crate::contracts::{PipelineError, PipelineResult};
use crate::data_models::manifest::{DisclosureLevel, ProgressiveOutput, ProgressivePayload};
use crate::data_models::signal::Signal;
use crate::run_context::RunContext;

use super::artifact_store::ArtifactStore;
use super::intelligence::{self, IntelligenceArtifact};
use super::ranking::{self, RankingArtifact};
use super::stage::{Stage, StageOutcome};

pub const L1_ARTIFACT_KIND: &str = "progressive_output_l1";
pub const L2_ARTIFACT_KIND: &str = "progressive_output_l2";
pub const L3_ARTIFACT_KIND: &str = "progressive_output_l3";
pub const L4_ARTIFACT_KIND: &str = "progressive_output_l4";

const L1_MAX: usize = 5;
const L2_MAX: usize = 15;
const L3_MAX: usize = 25;
const L1_MIN_CONFIDENCE: f64 = 0.7;
const L2_MIN_CONFIDENCE: f64 = 0.5;

/// Greedily fills a level up to `max` from `pool`, skipping ids already
/// claimed by an earlier (higher) level. Mutates `claimed` with everything it
/// takes so later levels never re-offer the same signal.
fn fill_level(
    pool: &[Signal],
    claimed: &mut HashSet<String>,
    max: usize,
    primary: impl Fn(&Signal) -> bool,
    fallback: impl Fn(&Signal) -> bool,
) -> Vec<Signal> {
    let mut picked = Vec::new();
    for s in pool {
        if picked.len() >= max {
            break;
        }
        if claimed.contains(&s.id) {
            continue;
        }
        if primary(s) {
            picked.push(s.clone());
        }
    }
    for s in picked.iter() {
        claimed.insert(s.id.clone());
    }
    if picked.len() < max {
        for s in pool {
            if picked.len() >= max {
                break;
            }
            if claimed.contains(&s.id) {
                continue;
            }
            if fallback(s) {
                picked.push(s.clone());
                claimed.insert(s.id.clone());
            }
        }
    }
    picked
}

/// Renders the fixed L4 query-text templates, parameterized by namespace,
/// run id, target brand, and the ranked competitor set. Every template is a
/// complete, syntactically well-formed statement in dry-run mode too, since
/// no external call is needed to fill in its placeholders.
pub fn build_query_templates(namespace: &str, run_id: &str, brand: &str, competitors: &[String]) -> Vec<String> {
    let competitor_list = if competitors.is_empty() {
        "NULL".to_string()
    } else {
        competitors.iter().map(|c| format!("'{}'", c.replace('\'', "''"))).collect::<Vec<_>>().join(", ")
    };

    vec![
        format!(
            "SELECT * FROM {namespace}.ads_raw WHERE run_id = '{run_id}' AND brand = '{brand}' ORDER BY start_ts DESC",
            namespace = namespace, run_id = run_id, brand = brand
        ),
        format!(
            "SELECT brand, COUNT(*) AS ad_count FROM {namespace}.ads_raw WHERE run_id = '{run_id}' AND brand IN ({competitors}) GROUP BY brand ORDER BY ad_count DESC",
            namespace = namespace, run_id = run_id, competitors = competitor_list
        ),
        format!(
            "SELECT source_brand, copier_brand, AVG(cosine_distance) AS avg_distance FROM {namespace}.similarity_edges WHERE run_id = '{run_id}' GROUP BY source_brand, copier_brand",
            namespace = namespace, run_id = run_id
        ),
        format!(
            "SELECT dimension, COUNT(*) AS signal_count FROM {namespace}.signals WHERE run_id = '{run_id}' GROUP BY dimension ORDER BY signal_count DESC",
            namespace = namespace, run_id = run_id
        ),
        format!(
            "SELECT ad_id, fatigue_score, level FROM {namespace}.creative_fatigue WHERE run_id = '{run_id}' AND level IN ('CRITICAL', 'HIGH') ORDER BY fatigue_score DESC",
            namespace = namespace, run_id = run_id
        ),
    ]
}

pub struct OutputStage;

impl OutputStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OutputStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for OutputStage {
    fn name(&self) -> &'static str {
        "enhanced_output"
    }

    async fn run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let store = ArtifactStore::for_run(ctx);
        let intelligence: IntelligenceArtifact = store
            .read(intelligence::ARTIFACT_KIND, ctx.run_id.as_str())?
            .ok_or_else(|| PipelineError::schema_drift(intelligence::ARTIFACT_KIND, "signals"))?;
        let ranking: RankingArtifact = store
            .read(ranking::ARTIFACT_KIND, ctx.run_id.as_str())?
            .unwrap_or(RankingArtifact { ranked: vec![], degraded: false });

        let (l1_floor, l2_floor, l3_floor, _l4_unused) = (
            ctx.config.progressive_disclosure_thresholds.0,
            ctx.config.progressive_disclosure_thresholds.1,
            ctx.config.progressive_disclosure_thresholds.2,
            ctx.config.progressive_disclosure_thresholds.3,
        );

        let mut pool = intelligence.signals.clone();
        pool.sort_by(|a, b| b.severity_score.partial_cmp(&a.severity_score).unwrap_or(std::cmp::Ordering::Equal));

        let mut claimed = HashSet::new();

        let l1 = fill_level(
            &pool,
            &mut claimed,
            L1_MAX,
            |s| s.severity_score >= l1_floor && s.confidence >= L1_MIN_CONFIDENCE,
            |s| s.severity_score >= l2_floor,
        );
        let l2 = fill_level(
            &pool,
            &mut claimed,
            L2_MAX,
            |s| s.severity_score >= l2_floor && s.confidence >= L2_MIN_CONFIDENCE,
            |_| false,
        );
        let l3 = fill_level(&pool, &mut claimed, L3_MAX, |s| s.severity_score >= l3_floor, |_| false);

        let competitors: Vec<String> = ranking.ranked.iter().map(|c| c.name.clone()).collect();
        let query_texts = build_query_templates(&ctx.namespace, ctx.run_id.as_str(), &ctx.target_brand, &competitors);

        let now = Utc::now();
        let l1_output = ProgressiveOutput { level: DisclosureLevel::L1, payload: ProgressivePayload::Signals(l1.clone()), generated_at: now };
        let l2_output = ProgressiveOutput { level: DisclosureLevel::L2, payload: ProgressivePayload::Signals(l2.clone()), generated_at: now };
        let l3_output = ProgressiveOutput { level: DisclosureLevel::L3, payload: ProgressivePayload::Signals(l3.clone()), generated_at: now };
        let l4_output = ProgressiveOutput { level: DisclosureLevel::L4, payload: ProgressivePayload::QueryTexts(query_texts), generated_at: now };

        store.write(L1_ARTIFACT_KIND, ctx.run_id.as_str(), &l1_output)?;
        store.write(L2_ARTIFACT_KIND, ctx.run_id.as_str(), &l2_output)?;
        store.write(L3_ARTIFACT_KIND, ctx.run_id.as_str(), &l3_output)?;
        store.write(L4_ARTIFACT_KIND, ctx.run_id.as_str(), &l4_output)?;

        Ok(StageOutcome::ok(vec![
            ctx.artifact_name(L1_ARTIFACT_KIND),
            ctx.artifact_name(L2_ARTIFACT_KIND),
            ctx.artifact_name(L3_ARTIFACT_KIND),
            ctx.artifact_name(L4_ARTIFACT_KIND),
        ]))
    }

    async fn dry_run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let query_texts = build_query_templates(&ctx.namespace, ctx.run_id.as_str(), &ctx.target_brand, &[]);
        ctx.progress.emit(crate::run_context::ProgressEvent::Note {
            stage: self.name().to_string(),
            message: format!("would render {} L4 query templates", query_texts.len()),
        });
        Ok(StageOutcome::ok(vec![]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_models::signal::Dimension;

    fn signal(id: &str, confidence: f64, impact: f64, actionability: f64) -> Signal {
        Signal::new(id, Dimension::Competitive, id, "claim", confidence, impact, actionability, vec![])
    }

    #[test]
    fn thirty_even_severities_fill_l1_with_top_five() {
        // 30 signals evenly spanning confidence/impact/actionability so
        // severity_score spans roughly [0,1] in even steps.
        let mut pool: Vec<Signal> = (0..30)
            .map(|i| {
                let v = i as f64 / 29.0;
                signal(&format!("s{}", i), v, v, v)
            })
            .collect();
        pool.sort_by(|a, b| b.severity_score.partial_cmp(&a.severity_score).unwrap());

        let mut claimed = HashSet::new();
        let l1 = fill_level(&pool, &mut claimed, L1_MAX, |s| s.severity_score >= 0.8 && s.confidence >= L1_MIN_CONFIDENCE, |s| s.severity_score >= 0.6);
        assert_eq!(l1.len(), L1_MAX);
        for s in &l1 {
            assert!(s.severity_score >= 0.6);
        }

        let l2 = fill_level(&pool, &mut claimed, L2_MAX, |s| s.severity_score >= 0.6 && s.confidence >= L2_MIN_CONFIDENCE, |_| false);
        let l3 = fill_level(&pool, &mut claimed, L3_MAX, |s| s.severity_score >= 0.4, |_| false);

        let mut all_ids: Vec<&str> = l1.iter().map(|s| s.id.as_str()).collect();
        all_ids.extend(l2.iter().map(|s| s.id.as_str()));
        let before = all_ids.len();
        all_ids.extend(l3.iter().map(|s| s.id.as_str()));
        let after_l3 = all_ids.len();
        let mut unique = all_ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), after_l3);
        assert!(before <= after_l3);
    }

    #[test]
    fn query_templates_interpolate_every_placeholder() {
        let templates = build_query_templates("adcompete_abc123", "abc123", "Acme", &["Northwind".to_string()]);
        assert_eq!(templates.len(), 5);
        assert!(templates[0].contains("adcompete_abc123.ads_raw"));
        assert!(templates[0].contains("'abc123'"));
        assert!(templates[0].contains("'Acme'"));
        assert!(templates[1].contains("'Northwind'"));
    }
}
