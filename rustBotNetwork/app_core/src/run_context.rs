use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::PipelineConfig;
use crate::utils::logger;

/// Opaque, globally-unique identifier that namespaces every artifact produced
/// by one pipeline invocation. Deliberately a newtype rather than a bare
/// `String` so a raw brand name can never be passed where a run id is
/// expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derives a stable run id from (brand, vertical, a caller-supplied seed
    /// string) by SHA-256 hashing, truncated to 16 hex characters. Used by
    /// `dry_run` and by tests that need byte-identical reruns; a freshly
    /// started interactive run instead supplies an externally generated id
    /// (e.g. a ULID) via `RunId::new`.
    pub fn derive(brand: &str, vertical: Option<&str>, seed: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(brand.as_bytes());
        hasher.update(b"\0");
        hasher.update(vertical.unwrap_or("").as_bytes());
        hasher.update(b"\0");
        hasher.update(seed.as_bytes());
        let digest = hasher.finalize();
        let hex = digest.iter().map(|b| format!("{:02x}", b)).collect::<String>();
        Self(hex[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress events a stage reports as it runs; consumed by the CLI for
/// one-line-per-stage output and by tests asserting ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    StageStarted { stage: String },
    StageFinished { stage: String, status: String },
    Note { stage: String, message: String },
}

/// # NDOC
/// component: `run_context`
/// purpose: Abstracts how stage progress is surfaced, so stages never print
///   directly and tests can capture events instead of stdout.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Default sink: routes every event through the structured JSON logger.
pub struct LoggingProgressSink;

impl ProgressSink for LoggingProgressSink {
    fn emit(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::StageStarted { stage } => {
                logger::log_stage_event(stage, "RUNNING", &serde_json::json!({}));
            }
            ProgressEvent::StageFinished { stage, status } => {
                logger::log_stage_event(stage, status, &serde_json::json!({}));
            }
            ProgressEvent::Note { stage, message } => {
                logger::log_stage_event(stage, "NOTE", &serde_json::json!({ "message": message }));
            }
        }
    }
}

/// In-memory sink used by tests and by `dry_run` callers that want to inspect
/// the event sequence without parsing log lines.
#[derive(Default)]
pub struct CollectingProgressSink {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().expect("progress sink mutex poisoned").clone()
    }
}

impl ProgressSink for CollectingProgressSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().expect("progress sink mutex poisoned").push(event);
    }
}

/// # NDOC
/// component: `run_context`
/// purpose: The single explicit value threaded through every stage and
///   helper, replacing any module-level mutable state (namespace, run id).
/// invariants:
///   - Immutable for the lifetime of a run except for the logger/progress
///     sink, which are interior-mutable collaborators, not context state.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub target_brand: String,
    pub vertical: Option<String>,
    pub namespace: String,
    pub config: Arc<PipelineConfig>,
    pub progress: Arc<dyn ProgressSink>,
}

impl RunContext {
    pub fn new(
        run_id: RunId,
        target_brand: impl Into<String>,
        vertical: Option<String>,
        config: PipelineConfig,
    ) -> Self {
        let run_id_str = run_id.as_str().to_string();
        Self {
            namespace: format!("adcompete_{}", run_id_str),
            run_id,
            target_brand: target_brand.into(),
            vertical,
            config: Arc::new(config),
            progress: Arc::new(LoggingProgressSink),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Builds the bit-exact artifact name `<kind>_<run_id>` used by the
    /// artifact store and the run manifest.
    pub fn artifact_name(&self, kind: &str) -> String {
        format!("{}_{}", kind, self.run_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic_for_same_inputs() {
        let a = RunId::derive("Acme", Some("eyewear"), "seed-1");
        let b = RunId::derive("Acme", Some("eyewear"), "seed-1");
        assert_eq!(a, b);
    }

    #[test]
    fn derive_differs_for_different_brand() {
        let a = RunId::derive("Acme", Some("eyewear"), "seed-1");
        let b = RunId::derive("Ace", Some("eyewear"), "seed-1");
        assert_ne!(a, b);
    }

    #[test]
    fn artifact_name_matches_naming_contract() {
        let ctx = RunContext::new(
            RunId::new("abc123"),
            "Acme",
            None,
            PipelineConfig::default(),
        );
        assert_eq!(ctx.artifact_name("competitors_raw"), "competitors_raw_abc123");
    }

    #[test]
    fn collecting_sink_records_events_in_order() {
        let sink = CollectingProgressSink::new();
        sink.emit(ProgressEvent::StageStarted { stage: "discovery".into() });
        sink.emit(ProgressEvent::StageFinished {
            stage: "discovery".into(),
            status: "OK".into(),
        });
        let events = sink.events();
        assert_eq!(events.len(), 2);
    }
}
