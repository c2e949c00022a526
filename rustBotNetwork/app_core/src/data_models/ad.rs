use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    Image,
    Video,
    Carousel,
    Mixed,
    TextOnly,
    Dco,
}

impl MediaType {
    /// Classification rule from Ingestion: if any video-preview present and
    /// any image present -> MIXED; only videos -> VIDEO; multiple images ->
    /// CAROUSEL; one image -> IMAGE; else TEXT_ONLY.
    pub fn classify(has_video: bool, image_count: usize) -> Self {
        if has_video && image_count > 0 {
            MediaType::Mixed
        } else if has_video {
            MediaType::Video
        } else if image_count > 1 {
            MediaType::Carousel
        } else if image_count == 1 {
            MediaType::Image
        } else {
            MediaType::TextOnly
        }
    }
}

/// A single normalized creative, the unit of work for every downstream
/// stage. Immutable once persisted by Ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ad {
    pub ad_id: String,
    pub brand: String,
    pub creative_text: String,
    pub media_type: MediaType,
    pub primary_visual_uri: Option<String>,
    pub visual_uris: Vec<String>,
    pub card_count: usize,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub active_days: i64,
    pub publisher_platforms: BTreeSet<String>,
    pub page_category: Option<String>,
    /// Set by an upstream stage if it had to synthesize/fall back on a
    /// partial result; propagated so downstream output can surface it.
    pub degraded: bool,
}

impl Ad {
    /// Inclusive day difference between start and end (or now if end is
    /// absent). `start=today, no end => 1`; `start=today-7,end=today => 8`.
    pub fn compute_active_days(start_ts: DateTime<Utc>, end_ts: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
        let end = end_ts.unwrap_or(now);
        let start_day = start_ts.date_naive();
        let end_day = end.date_naive();
        (end_day - start_day).num_days() + 1
    }

    pub fn is_transient_test_ad(&self) -> bool {
        self.active_days < 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn active_days_same_day_no_end_is_one() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        assert_eq!(Ad::compute_active_days(now, None, now), 1);
    }

    #[test]
    fn active_days_seven_day_span_is_eight() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
        let start = now - chrono::Duration::days(7);
        assert_eq!(Ad::compute_active_days(start, Some(now), now), 8);
    }

    #[test]
    fn media_type_classification_rules() {
        assert_eq!(MediaType::classify(true, 1), MediaType::Mixed);
        assert_eq!(MediaType::classify(true, 0), MediaType::Video);
        assert_eq!(MediaType::classify(false, 2), MediaType::Carousel);
        assert_eq!(MediaType::classify(false, 1), MediaType::Image);
        assert_eq!(MediaType::classify(false, 0), MediaType::TextOnly);
    }
}
