use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// # NDOC
/// component: `contracts`
/// purpose: Standard result alias threaded through stages and the orchestrator.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// # NDOC
/// component: `contracts`
/// purpose: Error taxonomy (naming, not type hierarchy) shared by every stage and
///   external-collaborator adapter.
/// invariants:
///   - Every variant maps to exactly one orchestrator disposition (see
///     `PipelineError::is_fatal`); a new variant must update that mapping.
///   - `message` is safe to print to an operator; it never carries secrets.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
pub enum PipelineError {
    /// Bad brand, empty config, malformed CLI arguments. Fatal, exit 64.
    #[error("input error: {message}")]
    Input { message: String },

    /// Search/archive quota exceeded. Stage degrades with partial output.
    #[error("upstream quota exceeded: {message}")]
    UpstreamQuota { message: String },

    /// Provider signalled rate limiting; caller should retry with backoff.
    #[error("upstream rate limited: {message}")]
    UpstreamRateLimit { message: String },

    /// 5xx / network failure from an external collaborator.
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable { message: String, retryable: bool },

    /// Warehouse auth/permission failure. The run cannot proceed.
    #[error("warehouse error: {message}")]
    Warehouse { message: String },

    /// Expected column/field missing in an upstream artifact.
    #[error("schema drift in artifact '{artifact}': missing field '{field}'")]
    SchemaDrift { artifact: String, field: String },

    /// AI call returned unparseable JSON or out-of-schema values for a row.
    #[error("AI output malformed: {message}")]
    AiOutputMalformed { message: String, affected_rows: usize, total_rows: usize },

    /// Visual-intel (or other) budget exceeded; not itself an error condition,
    /// represented here so call sites can thread it through the same `Result`.
    #[error("budget exceeded: {message}")]
    BudgetExceeded { message: String },

    /// Caller-facing validation failure with no more specific home.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Catch-all for unexpected failures caught at the orchestrator boundary.
    #[error("internal error: {message}")]
    Internal { message: String, details: Option<Value> },
}

impl PipelineError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input { message: message.into() }
    }

    pub fn upstream_quota(message: impl Into<String>) -> Self {
        Self::UpstreamQuota { message: message.into() }
    }

    pub fn upstream_rate_limit(message: impl Into<String>) -> Self {
        Self::UpstreamRateLimit { message: message.into() }
    }

    pub fn upstream_unavailable(message: impl Into<String>, retryable: bool) -> Self {
        Self::UpstreamUnavailable { message: message.into(), retryable }
    }

    pub fn warehouse(message: impl Into<String>) -> Self {
        Self::Warehouse { message: message.into() }
    }

    pub fn schema_drift(artifact: impl Into<String>, field: impl Into<String>) -> Self {
        Self::SchemaDrift { artifact: artifact.into(), field: field.into() }
    }

    pub fn ai_output_malformed(
        message: impl Into<String>,
        affected_rows: usize,
        total_rows: usize,
    ) -> Self {
        Self::AiOutputMalformed { message: message.into(), affected_rows, total_rows }
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::BudgetExceeded { message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), details: None }
    }

    pub fn with_details(self, details: Value) -> Self {
        match self {
            Self::Internal { message, .. } => Self::Internal { message, details: Some(details) },
            other => other,
        }
    }

    /// Whether this error, left unhandled, must abort the pipeline (FAILED)
    /// rather than degrade. Mirrors the orchestrator failure policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Input { .. }
                | PipelineError::Warehouse { .. }
                | PipelineError::SchemaDrift { .. }
        )
    }

    /// Whether an automated retry of the originating call is worth attempting.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::UpstreamRateLimit { .. } => true,
            PipelineError::UpstreamUnavailable { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// AI-output row corruption crosses the stage's own threshold and must
    /// demote the whole stage to DEGRADED per the 20% rule.
    pub fn exceeds_malformed_threshold(&self) -> bool {
        match self {
            PipelineError::AiOutputMalformed { affected_rows, total_rows, .. } => {
                *total_rows > 0 && (*affected_rows as f64 / *total_rows as f64) > 0.2
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(value: std::io::Error) -> Self {
        PipelineError::internal(value.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(value: serde_json::Error) -> Self {
        PipelineError::validation(value.to_string())
    }
}

/// # NDOC
/// component: `contracts`
/// purpose: Declares a typed request/response contract for a single
///   warehouse or provider operation.
pub trait ToolContract {
    const NAME: &'static str;
    const VERSION: &'static str;
    type Input: serde::de::DeserializeOwned + Send + Sync + 'static;
    type Output: Serialize + Send + Sync + 'static;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_variants_match_failure_policy() {
        assert!(PipelineError::input("bad brand").is_fatal());
        assert!(PipelineError::warehouse("auth failed").is_fatal());
        assert!(PipelineError::schema_drift("ads_raw", "start_ts").is_fatal());
        assert!(!PipelineError::upstream_quota("search quota").is_fatal());
        assert!(!PipelineError::budget_exceeded("visual budget").is_fatal());
    }

    #[test]
    fn retryable_variants_are_distinguished() {
        assert!(PipelineError::upstream_rate_limit("429").is_retryable());
        assert!(PipelineError::upstream_unavailable("502", true).is_retryable());
        assert!(!PipelineError::upstream_unavailable("404", false).is_retryable());
        assert!(!PipelineError::input("bad").is_retryable());
    }

    #[test]
    fn malformed_threshold_uses_twenty_percent_rule() {
        let under = PipelineError::ai_output_malformed("x", 1, 10);
        let over = PipelineError::ai_output_malformed("x", 3, 10);
        assert!(!under.exceeds_malformed_threshold());
        assert!(over.exceeds_malformed_threshold());
    }
}
