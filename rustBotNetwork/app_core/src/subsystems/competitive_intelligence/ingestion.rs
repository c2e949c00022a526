use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::contracts::{PipelineError, PipelineResult};
use crate::data_models::ad::{Ad, MediaType};
use crate::run_context::RunContext;

use super::artifact_store::ArtifactStore;
use super::connectors::{AdArchiveProvider, RawAdRecord};
use super::ranking::{self, RankingArtifact};
use super::retry::retry_with_backoff;
use super::stage::{Stage, StageOutcome};

pub const RAW_ARTIFACT_KIND: &str = "ads_raw";
pub const ARTIFACT_KIND: &str = "ads_with_dates";

/// The as-fetched records per brand, before date parsing, `active_days`
/// derivation, or the transient-test-ad drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIngestionArtifact {
    pub records: Vec<RawAdEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAdEntry {
    pub brand: String,
    pub record: RawAdRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionArtifact {
    pub ads: Vec<Ad>,
    pub degraded: bool,
}

/// `creative_text`: title, body, then every non-empty card body, joined with
/// `|`, empties omitted.
pub fn build_creative_text(title: &str, body: &str, card_bodies: &[String]) -> String {
    let mut parts = Vec::new();
    if !title.trim().is_empty() {
        parts.push(title.trim().to_string());
    }
    if !body.trim().is_empty() {
        parts.push(body.trim().to_string());
    }
    for card in card_bodies {
        if !card.trim().is_empty() {
            parts.push(card.trim().to_string());
        }
    }
    parts.join("|")
}

fn parse_ts(value: &Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_ref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Normalizes one raw record into the unified `Ad` schema, or `None` if it
/// fails the "transient test ad" business rule (`active_days < 2`) or lacks
/// a parseable start timestamp.
pub fn normalize_ad(record: RawAdRecord, brand: &str, ad_id: String, now: DateTime<Utc>) -> Option<Ad> {
    let start_ts = parse_ts(&record.start_time)?;
    let end_ts = parse_ts(&record.end_time);

    let creative_text = build_creative_text(&record.title, &record.body, &record.card_bodies);

    // Priority: original/resized image URIs before video previews.
    let mut visual_uris = record.card_image_urls.clone();
    visual_uris.extend(record.card_video_preview_urls.clone());
    let primary_visual_uri = visual_uris.first().cloned();

    let media_type = MediaType::classify(!record.card_video_preview_urls.is_empty(), record.card_image_urls.len());

    let card_count = record
        .card_bodies
        .len()
        .max(record.card_image_urls.len())
        .max(record.card_video_preview_urls.len())
        .max(1);

    let active_days = Ad::compute_active_days(start_ts, end_ts, now);

    let ad = Ad {
        ad_id,
        brand: brand.to_string(),
        creative_text,
        media_type,
        primary_visual_uri,
        visual_uris,
        card_count,
        start_ts,
        end_ts,
        active_days,
        publisher_platforms: record.publisher_platforms.into_iter().collect::<BTreeSet<_>>(),
        page_category: record.page_category,
        degraded: false,
    };

    if ad.is_transient_test_ad() {
        None
    } else {
        Some(ad)
    }
}

pub struct IngestionStage {
    pub archive: Arc<dyn AdArchiveProvider>,
}

impl IngestionStage {
    pub fn new(archive: Arc<dyn AdArchiveProvider>) -> Self {
        Self { archive }
    }

    async fn fetch_for_brand(&self, brand: String, window_days: i64, timeout: std::time::Duration, max_attempts: u32) -> (String, PipelineResult<Vec<RawAdRecord>>) {
        let archive = self.archive.clone();
        let result = retry_with_backoff(max_attempts, std::time::Duration::from_millis(50), std::time::Duration::from_secs(5), || {
            let archive = archive.clone();
            let brand = brand.clone();
            async move {
                tokio::time::timeout(timeout, archive.fetch_ads(&brand, window_days))
                    .await
                    .map_err(|_| PipelineError::upstream_unavailable("ad archive call timed out", true))?
            }
        })
        .await;
        (brand, result)
    }
}

#[async_trait]
impl Stage for IngestionStage {
    fn name(&self) -> &'static str {
        "ingestion"
    }

    async fn run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        let store = ArtifactStore::for_run(ctx);
        let ranking: RankingArtifact = store
            .read(ranking::ARTIFACT_KIND, ctx.run_id.as_str())?
            .ok_or_else(|| PipelineError::schema_drift(ranking::ARTIFACT_KIND, "ranked"))?;

        let mut brands: Vec<String> = ranking.ranked.iter().map(|c| c.name.clone()).collect();
        brands.push(ctx.target_brand.clone());

        let timeout = std::time::Duration::from_secs(ctx.config.call_timeout_seconds);
        let max_attempts = ctx.config.max_retry_attempts;
        let window_days = ctx.config.forecast_lookback_days;

        let results = stream::iter(brands.into_iter().map(|brand| {
            let this_brand = brand.clone();
            async move { self.fetch_for_brand(this_brand, window_days, timeout, max_attempts).await }
        }))
        .buffer_unordered(ctx.config.ad_fetch_parallelism)
        .collect::<Vec<_>>()
        .await;

        let now = Utc::now();
        let mut raw_entries = Vec::new();
        let mut ads = Vec::new();
        let mut succeeded_brands = 0usize;
        let mut total_brands = 0usize;

        for (brand, result) in results {
            total_brands += 1;
            match result {
                Ok(records) => {
                    succeeded_brands += 1;
                    for (i, record) in records.into_iter().enumerate() {
                        raw_entries.push(RawAdEntry { brand: brand.clone(), record: record.clone() });
                        let ad_id = format!("{}-{}", brand.to_lowercase().replace(' ', "-"), i);
                        if let Some(ad) = normalize_ad(record, &brand, ad_id, now) {
                            ads.push(ad);
                        }
                    }
                }
                Err(_) => continue,
            }
        }

        if succeeded_brands == 0 {
            return Err(PipelineError::upstream_unavailable(
                "ad archive fetch failed for every brand",
                true,
            ));
        }

        ads.sort_by(|a, b| {
            a.brand
                .cmp(&b.brand)
                .then_with(|| b.start_ts.cmp(&a.start_ts))
                .then_with(|| a.ad_id.cmp(&b.ad_id))
        });

        let degraded = succeeded_brands < total_brands;
        let raw_name = ctx.artifact_name(RAW_ARTIFACT_KIND);
        let artifact_name = ctx.artifact_name(ARTIFACT_KIND);
        store.write(RAW_ARTIFACT_KIND, ctx.run_id.as_str(), &RawIngestionArtifact { records: raw_entries })?;
        let artifact = IngestionArtifact { ads, degraded };
        store.write(ARTIFACT_KIND, ctx.run_id.as_str(), &artifact)?;

        if degraded {
            Ok(StageOutcome::degraded(vec![raw_name, artifact_name], "partial per-brand fetch failure"))
        } else {
            Ok(StageOutcome::ok(vec![raw_name, artifact_name]))
        }
    }

    async fn dry_run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome> {
        ctx.progress.emit(crate::run_context::ProgressEvent::Note {
            stage: self.name().to_string(),
            message: format!(
                "would plan artifacts {}, {}",
                ctx.artifact_name(RAW_ARTIFACT_KIND),
                ctx.artifact_name(ARTIFACT_KIND)
            ),
        });
        Ok(StageOutcome::ok(vec![]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> RawAdRecord {
        RawAdRecord {
            ad_archive_id: "a1".into(),
            title: "Big Sale".into(),
            body: "Everything must go".into(),
            card_bodies: vec!["Card one".into(), "".into(), "Card two".into()],
            card_image_urls: vec!["https://img/1.png".into(), "https://img/2.png".into()],
            card_video_preview_urls: vec![],
            cta_text: "Shop".into(),
            start_time: Some((Utc::now() - chrono::Duration::days(7)).to_rfc3339()),
            end_time: Some(Utc::now().to_rfc3339()),
            publisher_platforms: vec!["facebook".into()],
            page_category: Some("apparel".into()),
        }
    }

    #[test]
    fn creative_text_contains_each_nonempty_segment_once() {
        let text = build_creative_text("Big Sale", "Everything must go", &["Card one".into(), "".into(), "Card two".into()]);
        assert_eq!(text, "Big Sale|Everything must go|Card one|Card two");
    }

    #[test]
    fn normalize_ad_classifies_carousel_and_computes_active_days() {
        let now = Utc::now();
        let ad = normalize_ad(sample_record(), "Acme", "acme-0".into(), now).unwrap();
        assert_eq!(ad.media_type, MediaType::Carousel);
        assert_eq!(ad.active_days, 8);
        assert_eq!(ad.visual_uris.len(), 2);
    }

    #[test]
    fn transient_ads_are_dropped() {
        let now = Utc::now();
        let mut record = sample_record();
        record.start_time = Some(now.to_rfc3339());
        record.end_time = Some(now.to_rfc3339());
        let ad = normalize_ad(record, "Acme", "acme-0".into(), now);
        assert!(ad.is_none());
    }

    #[test]
    fn missing_start_timestamp_yields_none() {
        let mut record = sample_record();
        record.start_time = None;
        assert!(normalize_ad(record, "Acme", "acme-0".into(), Utc::now()).is_none());
    }
}
