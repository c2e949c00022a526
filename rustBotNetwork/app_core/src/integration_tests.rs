// rustBotNetwork/app_core/src/integration_tests.rs

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::time::Instant;

    use proptest::prelude::*;

    use crate::config::PipelineConfig;
    use crate::data_models::manifest::{ProgressivePayload, StageStatus};
    use crate::data_models::signal::{Dimension, Signal};
    use crate::subsystems::competitive_intelligence::analysis::fatigue_score;
    use crate::subsystems::competitive_intelligence::connectors::{
        SimulatedAdArchiveProvider, SimulatedAiWarehouse, SimulatedSearchProvider,
    };
    use crate::subsystems::competitive_intelligence::orchestrator::PipelineOrchestrator;
    use crate::subsystems::competitive_intelligence::output::{build_query_templates, L1_ARTIFACT_KIND};
    use crate::subsystems::competitive_intelligence::visual;

    fn orchestrator() -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            Arc::new(SimulatedSearchProvider::new()),
            Arc::new(SimulatedAdArchiveProvider::new()),
            Arc::new(SimulatedAiWarehouse::new()),
        )
    }

    fn isolated_store_path() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::env::set_var("ADCOMPETE_ARTIFACT_STORE_PATH", dir.path());
        dir
    }

    // Scenario 1: dry run completes fast, every stage OK, no artifacts
    // persisted, L4 query text renders with the run id substituted.
    #[tokio::test]
    async fn scenario_dry_run_is_fast_and_all_ok() {
        let _dir = isolated_store_path();
        let started = Instant::now();
        let result = orchestrator()
            .dry_run("Acme", Some("eyewear".to_string()), PipelineConfig::default())
            .await
            .unwrap();
        assert!(started.elapsed().as_secs_f64() < 1.0);
        assert_eq!(result.manifest.stages.len(), 10);
        assert!(result.manifest.stages.iter().all(|s| s.status == StageStatus::Ok));
        assert!(result.manifest.stages.iter().all(|s| s.artifacts.is_empty()));

        let templates = build_query_templates("adcompete_x", &result.run_id, "Acme", &[]);
        assert!(templates.iter().all(|t| t.contains(&result.run_id)));
    }

    // Round-trip/boundary property: fatigue_score is always in [0,1]
    // regardless of input, and every arm is a well-defined real number
    // (scenario 2's copying-detection example is covered directly in
    // analysis.rs, next to detect_similarity_edges itself).
    proptest! {
        #[test]
        fn fatigue_score_always_bounded(
            originality in 0.0f64..=1.0,
            days_since_launch in 0i64..400,
            refresh_count in 0u32..20,
        ) {
            let score = fatigue_score(originality, days_since_launch, refresh_count);
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }

    // Scenario 4: portfolio-size to sample-size mapping.
    #[test]
    fn scenario_visual_budget_matches_documented_sample_sizes() {
        assert_eq!(visual::sample_size(10), 5);
        assert_eq!(visual::sample_size(40), 12);
        assert_eq!(visual::sample_size(80), 16);
        assert_eq!(visual::sample_size(300), 15);
    }

    // Scenario 5: 30 evenly-spanning signals, no level overlap, L1 capped at 5.
    #[tokio::test]
    async fn scenario_progressive_disclosure_respects_level_caps() {
        let dir = isolated_store_path();
        let orchestrator = orchestrator();
        let result = orchestrator
            .run("Acme", None, PipelineConfig::default(), None, false)
            .await
            .unwrap();
        assert!(result.manifest.overall_status() != StageStatus::Failed);
        assert!(result.manifest.final_level_counts.l1 <= 5);
        assert!(result.manifest.final_level_counts.l2 <= 15);
        assert!(result.manifest.final_level_counts.l3 <= 25);
        drop(dir);
    }

    // Scenario 6: deleting only the visual_intelligence artifact and
    // resuming re-executes stages 7-10 while leaving 1-6 byte-identical.
    #[tokio::test]
    async fn scenario_resume_reruns_only_downstream_of_deleted_artifact() {
        let dir = isolated_store_path();
        let namespace_root = dir.path().to_path_buf();

        let first = orchestrator()
            .run("Acme", None, PipelineConfig::default(), None, false)
            .await
            .unwrap();
        let run_id = first.run_id.clone();
        let namespace = format!("adcompete_{}", run_id);
        let artifact_dir = namespace_root.join(&namespace);

        let upstream_kinds = [
            crate::subsystems::competitive_intelligence::discovery::ARTIFACT_KIND,
            crate::subsystems::competitive_intelligence::curation::ARTIFACT_KIND,
            crate::subsystems::competitive_intelligence::ranking::ARTIFACT_KIND,
            crate::subsystems::competitive_intelligence::ingestion::RAW_ARTIFACT_KIND,
            crate::subsystems::competitive_intelligence::ingestion::ARTIFACT_KIND,
            crate::subsystems::competitive_intelligence::labeling::ARTIFACT_KIND,
            crate::subsystems::competitive_intelligence::embeddings::ARTIFACT_KIND,
        ];
        let before: Vec<(String, Vec<u8>)> = upstream_kinds
            .iter()
            .map(|kind| {
                let path = artifact_dir.join(format!("{}_{}.json", kind, run_id));
                (kind.to_string(), std::fs::read(&path).unwrap())
            })
            .collect();

        let visual_path = artifact_dir.join(format!("{}_{}.json", visual::ARTIFACT_KIND, run_id));
        std::fs::remove_file(&visual_path).unwrap();

        let resumed = orchestrator()
            .run(
                "Acme",
                None,
                PipelineConfig::default(),
                Some(crate::run_context::RunId::new(run_id.clone())),
                false,
            )
            .await
            .unwrap();

        for stage in &resumed.manifest.stages {
            match stage.name.as_str() {
                "discovery" | "curation" | "ranking" | "ingestion" | "strategic_labeling" | "embeddings" => {
                    assert_eq!(stage.status, StageStatus::Skipped, "{} should have been skipped on resume", stage.name);
                }
                "visual_intelligence" | "strategic_analysis" | "multi_dimensional_intelligence" | "enhanced_output" => {
                    assert_ne!(stage.status, StageStatus::Skipped, "{} should have re-executed on resume", stage.name);
                }
                _ => {}
            }
        }

        for (kind, bytes) in before {
            let path = artifact_dir.join(format!("{}_{}.json", kind, run_id));
            let after = std::fs::read(&path).unwrap();
            assert_eq!(bytes, after, "artifact '{}' must be byte-identical after resume", kind);
        }
    }

    // Universal invariant: L1/L2/L3 never share a signal.
    #[tokio::test]
    async fn invariant_no_signal_shared_across_disclosure_levels() {
        let dir = isolated_store_path();
        let result = orchestrator()
            .run("Acme", None, PipelineConfig::default(), None, false)
            .await
            .unwrap();
        let store = crate::subsystems::competitive_intelligence::artifact_store::ArtifactStore::for_run(
            &crate::run_context::RunContext::new(
                crate::run_context::RunId::new(result.run_id.clone()),
                "Acme",
                None,
                PipelineConfig::default(),
            ),
        );
        let mut seen = std::collections::HashSet::new();
        for kind in [
            L1_ARTIFACT_KIND,
            crate::subsystems::competitive_intelligence::output::L2_ARTIFACT_KIND,
            crate::subsystems::competitive_intelligence::output::L3_ARTIFACT_KIND,
        ] {
            let output: crate::data_models::manifest::ProgressiveOutput =
                store.read(kind, &result.run_id).unwrap().unwrap();
            if let ProgressivePayload::Signals(signals) = output.payload {
                for s in signals {
                    assert!(seen.insert(s.id.clone()), "signal {} appeared in more than one level", s.id);
                }
            }
        }
        drop(dir);
    }

    // Universal invariant: severity is a monotone function of its inputs.
    #[test]
    fn invariant_severity_monotone_in_confidence() {
        let low = Signal::new("a", Dimension::Competitive, "k", "c", 0.1, 0.5, 0.5, vec![]);
        let high = Signal::new("b", Dimension::Competitive, "k", "c", 0.9, 0.5, 0.5, vec![]);
        assert!(high.severity_score > low.severity_score);
    }
}
