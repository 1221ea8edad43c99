//! Typed errors for conditions callers must tell apart.
//!
//! Plumbing code returns `anyhow::Result` and adds context with
//! `.with_context(..)`. Where a caller has to react differently to a
//! failure (reject a request, stream a fallback answer, exit non-zero),
//! the failure is raised as an [`AdvisorError`] and recovered with
//! `anyhow::Error::downcast_ref`.

use thiserror::Error;

use crate::validation::ValidationIssue;

#[derive(Debug, Error)]
pub enum AdvisorError {
    /// Input failed validation. Never retried.
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<ValidationIssue>),

    /// The answer-generation model call failed for a chat turn.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// An upstream service (model, embeddings, vector index) failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Missing credentials or endpoints. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The caller did not present the configured API secret.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl AdvisorError {
    pub fn validation(path: &str, message: impl Into<String>) -> Self {
        AdvisorError::Validation(vec![ValidationIssue {
            path: path.to_string(),
            message: message.into(),
        }])
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.path, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}
