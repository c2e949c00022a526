use serde::{Deserialize, Serialize};

use crate::contracts::PipelineError;

/// # NDOC
/// component: `config`
/// purpose: All tunables for a pipeline run, with the defaults the orchestrator
///   falls back to when a CLI/config-file value is absent.
/// invariants:
///   - Every field has a documented default; `validate()` must be called
///     before a `PipelineConfig` is handed to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_competitors: usize,
    pub ad_fetch_parallelism: usize,
    pub visual_budget_images_per_brand: usize,
    pub visual_total_budget: usize,
    pub similarity_cosine_threshold: f64,
    pub similarity_lag_days_max: i64,
    pub forecast_horizon_weeks: u32,
    pub progressive_disclosure_thresholds: (f64, f64, f64, f64),
    pub angle_confidence_floor: f64,
    pub dry_run: bool,
    /// Trailing window (days) used for current-state aggregation and for the
    /// forecast's weekly time series. Open question #3: source snippets
    /// disagreed between 90 and 180 days; fixed at 90 and exposed here as a
    /// documented knob rather than a hardcoded constant.
    pub forecast_lookback_days: i64,
    /// Minimum number of discovery candidates required before the stage is
    /// considered healthy rather than DEGRADED.
    pub discovery_min_candidates: usize,
    /// Per-call timeout applied to every external operation.
    pub call_timeout_seconds: u64,
    /// Per-stage soft deadline; exceeding it drives early DEGRADED exit.
    pub stage_deadline_seconds: u64,
    /// Maximum number of retry attempts for a retryable error before the
    /// call site gives up and surfaces DEGRADED/FAILED to its stage.
    pub max_retry_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_competitors: 10,
            ad_fetch_parallelism: 3,
            visual_budget_images_per_brand: 20,
            visual_total_budget: 200,
            similarity_cosine_threshold: 0.3,
            similarity_lag_days_max: 14,
            forecast_horizon_weeks: 4,
            progressive_disclosure_thresholds: (0.8, 0.6, 0.4, 0.2),
            angle_confidence_floor: 0.5,
            dry_run: false,
            forecast_lookback_days: 90,
            discovery_min_candidates: 20,
            call_timeout_seconds: 60,
            stage_deadline_seconds: 600,
            max_retry_attempts: 5,
        }
    }
}

impl PipelineConfig {
    /// Validates structural invariants that the orchestrator and stages rely
    /// on without re-checking. Called once at run start; an invalid config is
    /// an `Input` error (fatal, exit 64).
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_competitors == 0 {
            return Err(PipelineError::input("max_competitors must be >= 1"));
        }
        if self.ad_fetch_parallelism == 0 {
            return Err(PipelineError::input("ad_fetch_parallelism must be >= 1"));
        }
        if self.visual_total_budget == 0 {
            return Err(PipelineError::input("visual_total_budget must be >= 1"));
        }
        if !(0.0..=2.0).contains(&self.similarity_cosine_threshold) {
            return Err(PipelineError::input(
                "similarity_cosine_threshold must be in [0,2]",
            ));
        }
        if self.similarity_lag_days_max < 0 {
            return Err(PipelineError::input(
                "similarity_lag_days_max must be >= 0",
            ));
        }
        if self.forecast_horizon_weeks == 0 {
            return Err(PipelineError::input("forecast_horizon_weeks must be >= 1"));
        }
        let (a, b, c, d) = self.progressive_disclosure_thresholds;
        if !(a > b && b > c && c > d) {
            return Err(PipelineError::input(
                "progressive_disclosure_thresholds must be strictly descending",
            ));
        }
        if !(0.0..=1.0).contains(&self.angle_confidence_floor) {
            return Err(PipelineError::input(
                "angle_confidence_floor must be in [0,1]",
            ));
        }
        if self.forecast_lookback_days <= 0 {
            return Err(PipelineError::input(
                "forecast_lookback_days must be positive",
            ));
        }
        if self.call_timeout_seconds == 0 {
            return Err(PipelineError::input("call_timeout_seconds must be >= 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_max_competitors() {
        let mut cfg = PipelineConfig::default();
        cfg.max_competitors = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_descending_thresholds() {
        let mut cfg = PipelineConfig::default();
        cfg.progressive_disclosure_thresholds = (0.5, 0.6, 0.4, 0.2);
        assert!(cfg.validate().is_err());
    }
}
