//! Error kinds shared by the pipeline stages.
use thiserror::Error;

/// Failure classes surfaced by the core components.
///
/// External failures are converted into recorded status or a fallback by the
/// stage that observed them; only `Validation` is returned to the caller as a
/// per-item failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Network or target failure. Recorded, not retried within the run.
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// External quota signal. Causes an immediate skip or fallback.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// An external payload could not be parsed.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Bad input shape handed to a pure component.
    #[error("validation error: {0}")]
    Validation(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Unreachable(_) => "unreachable",
            PipelineError::RateLimited(_) => "rate_limited",
            PipelineError::MalformedResponse(_) => "malformed_response",
            PipelineError::Validation(_) => "validation",
        }
    }
}
