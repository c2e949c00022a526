use async_trait::async_trait;

use crate::contracts::PipelineResult;
use crate::data_models::manifest::StageStatus;
use crate::run_context::RunContext;

/// Outcome of a single stage execution, folded into the run manifest by the
/// orchestrator.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub status: StageStatus,
    pub artifacts: Vec<String>,
    pub degraded_reason: Option<String>,
}

impl StageOutcome {
    pub fn ok(artifacts: Vec<String>) -> Self {
        Self { status: StageStatus::Ok, artifacts, degraded_reason: None }
    }

    pub fn degraded(artifacts: Vec<String>, reason: impl Into<String>) -> Self {
        Self { status: StageStatus::Degraded, artifacts, degraded_reason: Some(reason.into()) }
    }

    pub fn skipped(artifacts: Vec<String>) -> Self {
        Self { status: StageStatus::Skipped, artifacts, degraded_reason: None }
    }
}

/// # NDOC
/// component: `stage`
/// purpose: Uniform contract every one of the ten pipeline stages implements.
/// invariants:
///   - `name()` matches the stage name recorded in the run manifest.
///   - `run` never panics on expected failure modes; it returns `Err` only
///     for conditions the orchestrator must turn into FAILED.
///   - `run` takes `&RunContext` explicitly; no stage may read global state.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Executes the stage against already-persisted upstream artifacts,
    /// writes its own artifact(s) via the `ArtifactStore`, and returns its
    /// disposition. An `Err` here is always converted to FAILED by the
    /// orchestrator; a degraded-but-recoverable condition must be returned
    /// as `Ok(StageOutcome::degraded(..))` instead of an `Err`.
    async fn run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome>;

    /// Validates inputs, plans artifact names, and (where applicable) emits
    /// generated query text, without any billable call or warehouse
    /// mutation. Must be fast; the orchestrator's `dry_run` budget is <1s
    /// total across all ten stages.
    async fn dry_run(&self, ctx: &RunContext) -> PipelineResult<StageOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_outcome_has_no_degraded_reason() {
        let outcome = StageOutcome::ok(vec!["competitors_raw_r1".into()]);
        assert_eq!(outcome.status, StageStatus::Ok);
        assert!(outcome.degraded_reason.is_none());
    }

    #[test]
    fn degraded_outcome_carries_a_reason() {
        let outcome = StageOutcome::degraded(vec![], "search quota exceeded");
        assert_eq!(outcome.status, StageStatus::Degraded);
        assert_eq!(outcome.degraded_reason.as_deref(), Some("search quota exceeded"));
    }
}
