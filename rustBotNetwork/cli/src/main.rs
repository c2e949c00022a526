// rustBotNetwork/cli/src/main.rs

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use adcompete_core::config::PipelineConfig;
use adcompete_core::data_models::manifest::StageStatus;
use adcompete_core::run_context::RunId;
use adcompete_core::subsystems::competitive_intelligence::connectors::{
    SimulatedAdArchiveProvider, SimulatedAiWarehouse, SimulatedSearchProvider,
};
use adcompete_core::subsystems::competitive_intelligence::orchestrator::PipelineOrchestrator;
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Competitive advertising intelligence pipeline", long_about = None)]
struct Cli {
    /// Target brand to run the pipeline for
    #[clap(long)]
    brand: String,

    /// Vertical override; derived from the brand name when omitted
    #[clap(long)]
    vertical: Option<String>,

    /// Validate inputs and plan artifacts without making any billable call
    #[clap(long)]
    dry_run: bool,

    /// Resume a previous run by id, skipping stages whose artifacts already exist
    #[clap(long)]
    resume: Option<String>,

    /// Re-run every stage even if artifacts for `--resume` already exist
    #[clap(long)]
    force: bool,

    /// Path to a JSON file overriding the default `PipelineConfig`
    #[clap(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<PathBuf>) -> Result<PipelineConfig, String> {
    match path {
        None => Ok(PipelineConfig::default()),
        Some(path) => {
            let body = std::fs::read_to_string(&path)
                .map_err(|e| format!("reading config file {:?}: {}", path, e))?;
            serde_json::from_str(&body).map_err(|e| format!("parsing config file {:?}: {}", path, e))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config) {
        Ok(c) => c,
        Err(message) => {
            eprintln!("usage error: {}", message);
            return ExitCode::from(64);
        }
    };
    if let Err(err) = config.validate() {
        eprintln!("usage error: {}", err);
        return ExitCode::from(64);
    }

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(SimulatedSearchProvider::new()),
        Arc::new(SimulatedAdArchiveProvider::new()),
        Arc::new(SimulatedAiWarehouse::new()),
    );

    if cli.dry_run {
        return match orchestrator.dry_run(&cli.brand, cli.vertical, config).await {
            Ok(result) => {
                print_stage_summary(&result.manifest.stages);
                println!("dry run OK for run {}", result.run_id);
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("dry run failed: {}", err);
                ExitCode::from(1)
            }
        };
    }

    let resume = cli.resume.map(RunId::new);
    match orchestrator.run(&cli.brand, cli.vertical, config, resume, cli.force).await {
        Ok(result) => {
            print_stage_summary(&result.manifest.stages);
            let counts = &result.manifest.final_level_counts;
            println!(
                "run {} finished {:?} — L1={} L2={} L3={} L4={}",
                result.run_id,
                result.manifest.overall_status(),
                counts.l1,
                counts.l2,
                counts.l3,
                counts.l4
            );
            match result.manifest.overall_status() {
                StageStatus::Failed => ExitCode::from(1),
                StageStatus::Degraded => ExitCode::from(2),
                _ => ExitCode::SUCCESS,
            }
        }
        Err(err) => {
            eprintln!("run failed before any stage executed: {}", err);
            ExitCode::from(1)
        }
    }
}

fn print_stage_summary(stages: &[adcompete_core::data_models::manifest::StageRecord]) {
    for stage in stages {
        let reason = stage.degraded_reason.as_deref().unwrap_or("");
        println!("  {:<32} {:?}  {}", stage.name, stage.status, reason);
    }
}
