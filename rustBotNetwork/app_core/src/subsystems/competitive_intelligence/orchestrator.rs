use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;

use crate::config::PipelineConfig;
use crate::contracts::PipelineResult;
use crate::data_models::manifest::{
    FinalLevelCounts, QualityCheck, RunManifest, StageRecord, StageStatus, VisualBudgetSummary,
};
use crate::run_context::{ProgressEvent, RunContext, RunId};

use super::analysis::AnalysisStage;
use super::artifact_store::ArtifactStore;
use super::connectors::{AdArchiveProvider, AiWarehouse, SearchProvider};
use super::curation::CurationStage;
use super::discovery::DiscoveryStage;
use super::embeddings::EmbeddingsStage;
use super::ingestion::IngestionStage;
use super::intelligence::IntelligenceStage;
use super::labeling::LabelingStage;
use super::output::{self, OutputStage};
use super::ranking::RankingStage;
use super::stage::{Stage, StageOutcome};
use super::visual::VisualStage;

/// Result of one full orchestrator run, independent of the persisted
/// manifest, so callers embedding the pipeline (tests, the CLI) don't need
/// to re-read the manifest artifact just to know what happened.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub manifest: RunManifest,
}

/// # NDOC
/// component: `orchestrator`
/// purpose: Sequences the ten pipeline stages, applies the FAILED/DEGRADED
///   disposition policy, persists the run manifest, and supports resuming a
///   partially-completed run by skipping stages whose artifacts already
///   exist.
/// invariants:
///   - No panic or unexpected error ever crosses `run`'s boundary; anything
///     not caught by a stage's own `Result` is converted to a FAILED stage
///     record instead.
///   - Stages execute strictly in sequence; a FAILED stage with no fallback
///     aborts every stage after it.
pub struct PipelineOrchestrator {
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineOrchestrator {
    pub fn new(
        search_provider: Arc<dyn SearchProvider>,
        archive: Arc<dyn AdArchiveProvider>,
        warehouse: Arc<dyn AiWarehouse>,
    ) -> Self {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(DiscoveryStage::new(search_provider)),
            Arc::new(CurationStage::new(warehouse.clone())),
            Arc::new(RankingStage::new(archive.clone())),
            Arc::new(IngestionStage::new(archive)),
            Arc::new(LabelingStage::new(warehouse.clone())),
            Arc::new(EmbeddingsStage::new(warehouse.clone())),
            Arc::new(VisualStage::new(warehouse.clone())),
            Arc::new(AnalysisStage::new(warehouse)),
            Arc::new(IntelligenceStage::new()),
            Arc::new(OutputStage::new()),
        ];
        Self { stages }
    }

    fn build_context(
        &self,
        brand: &str,
        vertical: Option<String>,
        config: PipelineConfig,
        run_id: Option<RunId>,
    ) -> RunContext {
        let run_id = run_id.unwrap_or_else(|| RunId::derive(brand, vertical.as_deref(), &Utc::now().timestamp_nanos_opt().unwrap_or(0).to_string()));
        RunContext::new(run_id, brand, vertical, config)
    }

    /// Runs every stage against already-persisted upstream artifacts,
    /// skipping a stage entirely when `resume` names a run whose artifact(s)
    /// for that stage already exist and `force` is false. A stage that
    /// returns `Err` is FAILED with no fallback: every later stage is
    /// recorded as SKIPPED and the manifest is written immediately.
    pub async fn run(
        &self,
        brand: &str,
        vertical: Option<String>,
        config: PipelineConfig,
        resume: Option<RunId>,
        force: bool,
    ) -> PipelineResult<RunResult> {
        config.validate()?;
        let resuming = resume.is_some();
        let ctx = self.build_context(brand, vertical.clone(), config.clone(), resume);
        let store = ArtifactStore::for_run(&ctx);

        let mut records = Vec::with_capacity(self.stages.len());
        let mut aborted = false;

        for stage in &self.stages {
            if aborted {
                records.push(StageRecord {
                    name: stage.name().to_string(),
                    status: StageStatus::Skipped,
                    started_at: Utc::now(),
                    ended_at: Utc::now(),
                    artifacts: vec![],
                    degraded_reason: Some("upstream stage failed".to_string()),
                });
                continue;
            }

            if resuming && !force && self.stage_already_complete(&store, stage.as_ref(), &ctx) {
                ctx.progress.emit(ProgressEvent::Note {
                    stage: stage.name().to_string(),
                    message: "resume: artifact present, skipping".to_string(),
                });
                records.push(StageRecord {
                    name: stage.name().to_string(),
                    status: StageStatus::Skipped,
                    started_at: Utc::now(),
                    ended_at: Utc::now(),
                    artifacts: vec![],
                    degraded_reason: None,
                });
                continue;
            }

            let started_at = Utc::now();
            ctx.progress.emit(ProgressEvent::StageStarted { stage: stage.name().to_string() });

            // `catch_unwind` requires `UnwindSafe`; the future itself is not,
            // so the panic boundary sits around the synchronous poll loop via
            // `AssertUnwindSafe`. A stage that panics is always converted to
            // FAILED, never allowed to unwind past the orchestrator.
            let outcome = std::panic::AssertUnwindSafe(stage.run(&ctx))
                .catch_unwind()
                .await;

            let record = match outcome {
                Ok(Ok(outcome)) => {
                    ctx.progress.emit(ProgressEvent::StageFinished {
                        stage: stage.name().to_string(),
                        status: format!("{:?}", outcome.status),
                    });
                    if !outcome.status.permits_next_stage() {
                        aborted = true;
                    }
                    StageRecord {
                        name: stage.name().to_string(),
                        status: outcome.status,
                        started_at,
                        ended_at: Utc::now(),
                        artifacts: outcome.artifacts,
                        degraded_reason: outcome.degraded_reason,
                    }
                }
                Ok(Err(err)) => {
                    aborted = true;
                    ctx.progress.emit(ProgressEvent::StageFinished {
                        stage: stage.name().to_string(),
                        status: "FAILED".to_string(),
                    });
                    StageRecord {
                        name: stage.name().to_string(),
                        status: StageStatus::Failed,
                        started_at,
                        ended_at: Utc::now(),
                        artifacts: vec![],
                        degraded_reason: Some(err.to_string()),
                    }
                }
                Err(panic) => {
                    aborted = true;
                    let message = panic_message(&panic);
                    ctx.progress.emit(ProgressEvent::StageFinished {
                        stage: stage.name().to_string(),
                        status: "FAILED".to_string(),
                    });
                    StageRecord {
                        name: stage.name().to_string(),
                        status: StageStatus::Failed,
                        started_at,
                        ended_at: Utc::now(),
                        artifacts: vec![],
                        degraded_reason: Some(format!("stage panicked: {}", message)),
                    }
                }
            };
            records.push(record);
        }

        let final_level_counts = self.read_final_level_counts(&store, &ctx);
        let visual_budget = self.read_visual_budget(&store, &ctx);
        let quality_checks = self.build_quality_checks(&store, &ctx, &records, &final_level_counts, visual_budget.as_ref());
        let manifest = RunManifest {
            run_id: ctx.run_id.as_str().to_string(),
            brand: brand.to_string(),
            vertical,
            config,
            stages: records,
            final_level_counts,
            visual_budget,
            quality_checks,
        };
        store.write("run_manifest", ctx.run_id.as_str(), &manifest)?;

        Ok(RunResult { run_id: ctx.run_id.as_str().to_string(), manifest })
    }

    /// Checks every artifact kind the stage contributes for presence (most
    /// stages write one; ingestion writes two, strategic_analysis four, and
    /// enhanced_output four). A stage only counts as complete when all of
    /// its artifacts are present.
    fn stage_already_complete(&self, store: &ArtifactStore, stage: &dyn Stage, ctx: &RunContext) -> bool {
        let kinds: &[&str] = match stage.name() {
            "discovery" => &[super::discovery::ARTIFACT_KIND],
            "curation" => &[super::curation::ARTIFACT_KIND],
            "ranking" => &[super::ranking::ARTIFACT_KIND],
            "ingestion" => &[super::ingestion::RAW_ARTIFACT_KIND, super::ingestion::ARTIFACT_KIND],
            "strategic_labeling" => &[super::labeling::ARTIFACT_KIND],
            "embeddings" => &[super::embeddings::ARTIFACT_KIND],
            "visual_intelligence" => &[super::visual::ARTIFACT_KIND],
            "strategic_analysis" => &[
                super::analysis::SIMILARITY_ARTIFACT_KIND,
                super::analysis::FATIGUE_ARTIFACT_KIND,
                super::analysis::CTA_ARTIFACT_KIND,
                super::analysis::FORECAST_ARTIFACT_KIND,
            ],
            "multi_dimensional_intelligence" => &[super::intelligence::ARTIFACT_KIND],
            "enhanced_output" => &[
                output::L1_ARTIFACT_KIND,
                output::L2_ARTIFACT_KIND,
                output::L3_ARTIFACT_KIND,
                output::L4_ARTIFACT_KIND,
            ],
            _ => &[],
        };
        !kinds.is_empty() && kinds.iter().all(|kind| store.exists(kind, ctx.run_id.as_str()))
    }

    fn read_final_level_counts(&self, store: &ArtifactStore, ctx: &RunContext) -> FinalLevelCounts {
        use crate::data_models::manifest::ProgressivePayload;

        let count_of = |kind: &str| -> usize {
            store
                .read::<crate::data_models::manifest::ProgressiveOutput>(kind, ctx.run_id.as_str())
                .ok()
                .flatten()
                .map(|output| match output.payload {
                    ProgressivePayload::Signals(s) => s.len(),
                    ProgressivePayload::QueryTexts(q) => q.len(),
                })
                .unwrap_or(0)
        };
        FinalLevelCounts {
            l1: count_of(output::L1_ARTIFACT_KIND),
            l2: count_of(output::L2_ARTIFACT_KIND),
            l3: count_of(output::L3_ARTIFACT_KIND),
            l4: count_of(output::L4_ARTIFACT_KIND),
        }
    }

    /// Reads back Visual Intelligence's requested/granted per-brand quotas,
    /// if the stage ran, so a budget shrink is visible on the manifest
    /// rather than only inside that stage's own artifact.
    fn read_visual_budget(&self, store: &ArtifactStore, ctx: &RunContext) -> Option<VisualBudgetSummary> {
        let artifact: super::visual::VisualIntelligenceArtifact =
            store.read(super::visual::ARTIFACT_KIND, ctx.run_id.as_str()).ok().flatten()?;
        let requested_total = artifact.requested_quota.values().sum();
        let granted_total = artifact.granted_quota.values().sum();
        Some(VisualBudgetSummary {
            requested_total,
            granted_total,
            shrunk: artifact.degraded,
            requested_per_brand: artifact.requested_quota.into_iter().collect(),
            granted_per_brand: artifact.granted_quota.into_iter().collect(),
        })
    }

    /// Post-run assertions independent of each stage's own reported status:
    /// every OK/DEGRADED stage left a well-formed artifact behind, the
    /// progressive-disclosure levels respect their caps, and the visual
    /// budget (if spent) never granted more than it was allowed.
    fn build_quality_checks(
        &self,
        store: &ArtifactStore,
        ctx: &RunContext,
        records: &[StageRecord],
        final_level_counts: &FinalLevelCounts,
        visual_budget: Option<&VisualBudgetSummary>,
    ) -> Vec<QualityCheck> {
        let mut checks = Vec::new();

        for record in records {
            if !matches!(record.status, StageStatus::Ok | StageStatus::Degraded) {
                continue;
            }
            let well_formed = self.stage_already_complete(
                store,
                self.stages.iter().find(|s| s.name() == record.name).map(|s| s.as_ref()).unwrap(),
                ctx,
            );
            checks.push(QualityCheck {
                code: format!("artifact_well_formed::{}", record.name),
                passed: well_formed,
                observed: format!("{:?}", record.status),
                expected: "readable artifact for every completed stage".to_string(),
            });
        }

        checks.push(QualityCheck {
            code: "disclosure_levels_within_caps".to_string(),
            passed: final_level_counts.l1 <= 5 && final_level_counts.l2 <= 15 && final_level_counts.l3 <= 25,
            observed: format!("l1={} l2={} l3={}", final_level_counts.l1, final_level_counts.l2, final_level_counts.l3),
            expected: "l1<=5, l2<=15, l3<=25".to_string(),
        });

        if let Some(budget) = visual_budget {
            checks.push(QualityCheck {
                code: "visual_budget_not_overgranted".to_string(),
                passed: budget.granted_total <= ctx.config.visual_total_budget,
                observed: format!("granted_total={}", budget.granted_total),
                expected: format!("<= visual_total_budget ({})", ctx.config.visual_total_budget),
            });
        }

        checks
    }

    /// Validates inputs and asks every stage to plan without any billable
    /// call. Budgeted at under one second total across all ten stages.
    pub async fn dry_run(&self, brand: &str, vertical: Option<String>, config: PipelineConfig) -> PipelineResult<RunResult> {
        config.validate()?;
        let ctx = self.build_context(brand, vertical.clone(), config.clone(), None);

        let mut records = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let started_at = Utc::now();
            let outcome = stage.dry_run(&ctx).await.unwrap_or_else(|err| StageOutcome {
                status: StageStatus::Failed,
                artifacts: vec![],
                degraded_reason: Some(err.to_string()),
            });
            records.push(StageRecord {
                name: stage.name().to_string(),
                status: outcome.status,
                started_at,
                ended_at: Utc::now(),
                artifacts: outcome.artifacts,
                degraded_reason: outcome.degraded_reason,
            });
        }

        let manifest = RunManifest {
            run_id: ctx.run_id.as_str().to_string(),
            brand: brand.to_string(),
            vertical,
            config,
            stages: records,
            final_level_counts: FinalLevelCounts::default(),
            visual_budget: None,
            quality_checks: vec![],
        };
        Ok(RunResult { run_id: ctx.run_id.as_str().to_string(), manifest })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::competitive_intelligence::connectors::{
        SimulatedAdArchiveProvider, SimulatedAiWarehouse, SimulatedSearchProvider,
    };

    fn orchestrator() -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            Arc::new(SimulatedSearchProvider::new()),
            Arc::new(SimulatedAdArchiveProvider::new()),
            Arc::new(SimulatedAiWarehouse::new()),
        )
    }

    #[tokio::test]
    async fn dry_run_completes_without_persisting_artifacts() {
        std::env::set_var("ADCOMPETE_ARTIFACT_STORE_PATH", tempfile::tempdir().unwrap().into_path());
        let orchestrator = orchestrator();
        let result = orchestrator
            .dry_run("Acme Eyewear", None, PipelineConfig::default())
            .await
            .unwrap();
        assert_eq!(result.manifest.stages.len(), 10);
        assert!(result.manifest.stages.iter().all(|s| s.status == StageStatus::Ok));
    }

    #[tokio::test]
    async fn full_run_produces_a_manifest_entry_per_stage() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("ADCOMPETE_ARTIFACT_STORE_PATH", dir.path());
        let orchestrator = orchestrator();
        let result = orchestrator
            .run("Acme Eyewear", None, PipelineConfig::default(), None, false)
            .await
            .unwrap();
        assert_eq!(result.manifest.stages.len(), 10);
        assert!(result.manifest.overall_status() != StageStatus::Failed);
    }
}
