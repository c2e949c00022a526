use serde::{Deserialize, Serialize};

pub const EMBEDDING_DIMENSION: usize = 768;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmbeddingQualityFlags {
    pub has_title: bool,
    pub has_body: bool,
    pub has_cta: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub ad_id: String,
    pub vector: Vec<f32>,
    pub model_version: String,
    pub quality_flags: EmbeddingQualityFlags,
}

impl Embedding {
    /// `"Title: {title} | Content: {body} | Action: {cta}"`, skipping empty
    /// segments the way the rest of Ingestion skips empty card bodies.
    pub fn build_structured_text(title: &str, body: &str, cta: &str) -> String {
        let mut parts = Vec::new();
        if !title.trim().is_empty() {
            parts.push(format!("Title: {}", title.trim()));
        }
        if !body.trim().is_empty() {
            parts.push(format!("Content: {}", body.trim()));
        }
        if !cta.trim().is_empty() {
            parts.push(format!("Action: {}", cta.trim()));
        }
        parts.join(" | ")
    }

    /// Ads whose concatenated text is shorter than 10 chars are skipped.
    pub fn should_skip(structured_text: &str) -> bool {
        structured_text.trim().chars().count() < 10
    }

    pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
        if a.len() != b.len() || a.is_empty() {
            return 1.0;
        }
        let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
        let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 1.0;
        }
        let cosine_similarity = dot / (norm_a * norm_b);
        (1.0 - cosine_similarity).clamp(0.0, 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_text_omits_empty_segments() {
        let text = Embedding::build_structured_text("Sale", "", "Shop now");
        assert_eq!(text, "Title: Sale | Action: Shop now");
    }

    #[test]
    fn short_text_is_skipped() {
        assert!(Embedding::should_skip("Hi"));
        assert!(!Embedding::should_skip("Title: Big Sale | Action: Buy"));
    }

    #[test]
    fn cosine_distance_is_zero_for_identical_vectors() {
        let v = vec![1.0_f32, 2.0, 3.0];
        assert!(Embedding::cosine_distance(&v, &v) < 1e-9);
    }

    #[test]
    fn cosine_distance_is_bounded_in_0_to_2() {
        let a = vec![1.0_f32, 0.0];
        let b = vec![-1.0_f32, 0.0];
        let d = Embedding::cosine_distance(&a, &b);
        assert!((0.0..=2.0).contains(&d));
    }
}
