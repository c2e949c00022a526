use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;

/// Common stage state machine: `PENDING -> RUNNING -> (OK | DEGRADED |
/// FAILED)`. Only `OK` and `DEGRADED` permit the next stage to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Running,
    Ok,
    Degraded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn permits_next_stage(&self) -> bool {
        matches!(self, StageStatus::Ok | StageStatus::Degraded | StageStatus::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub artifacts: Vec<String>,
    pub degraded_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FinalLevelCounts {
    pub l1: usize,
    pub l2: usize,
    pub l3: usize,
    pub l4: usize,
}

/// Spend-vs-allowance summary for Visual Intelligence's sampling budget,
/// surfaced on the manifest so a budget shrink is visible rather than a
/// silent artifact-only detail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualBudgetSummary {
    pub requested_total: usize,
    pub granted_total: usize,
    pub shrunk: bool,
    pub requested_per_brand: BTreeMap<String, usize>,
    pub granted_per_brand: BTreeMap<String, usize>,
}

/// One machine-checkable assertion evaluated against the finished run,
/// independent of whatever status the producing stage reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    pub code: String,
    pub passed: bool,
    pub observed: String,
    pub expected: String,
}

/// Persisted once at run end; the single artifact the CLI and `resume`
/// inspect to know what happened and what remains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub brand: String,
    pub vertical: Option<String>,
    pub config: PipelineConfig,
    pub stages: Vec<StageRecord>,
    pub final_level_counts: FinalLevelCounts,
    pub visual_budget: Option<VisualBudgetSummary>,
    pub quality_checks: Vec<QualityCheck>,
}

impl RunManifest {
    pub fn overall_status(&self) -> StageStatus {
        if self.stages.iter().any(|s| s.status == StageStatus::Failed) {
            StageStatus::Failed
        } else if self.stages.iter().any(|s| s.status == StageStatus::Degraded) {
            StageStatus::Degraded
        } else {
            StageStatus::Ok
        }
    }

    /// First stage with no well-formed artifact, used by `resume` to decide
    /// where to restart.
    pub fn first_incomplete_stage(&self) -> Option<&str> {
        self.stages
            .iter()
            .find(|s| !matches!(s.status, StageStatus::Ok | StageStatus::Degraded | StageStatus::Skipped))
            .map(|s| s.name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisclosureLevel {
    L1,
    L2,
    L3,
    L4,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressivePayload {
    Signals(Vec<crate::data_models::signal::Signal>),
    QueryTexts(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressiveOutput {
    pub level: DisclosureLevel,
    pub payload: ProgressivePayload,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_status_prefers_failed_over_degraded() {
        let manifest = RunManifest {
            run_id: "r1".into(),
            brand: "Acme".into(),
            vertical: None,
            config: PipelineConfig::default(),
            stages: vec![
                StageRecord {
                    name: "discovery".into(),
                    status: StageStatus::Degraded,
                    started_at: Utc::now(),
                    ended_at: Utc::now(),
                    artifacts: vec![],
                    degraded_reason: None,
                },
                StageRecord {
                    name: "curation".into(),
                    status: StageStatus::Failed,
                    started_at: Utc::now(),
                    ended_at: Utc::now(),
                    artifacts: vec![],
                    degraded_reason: None,
                },
            ],
            final_level_counts: FinalLevelCounts::default(),
            visual_budget: None,
            quality_checks: vec![],
        };
        assert_eq!(manifest.overall_status(), StageStatus::Failed);
    }
}
