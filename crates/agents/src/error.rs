//! Agent-level error type.

use thiserror::Error;

/// Errors returned by an agent's `invoke` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable` — the invocation is repeated with exponential back-off.
/// - `Fatal`     — the task fails immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Transient failure; the engine should re-try the invocation.
    #[error("retryable agent error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal agent error: {0}")]
    Fatal(String),

    /// A built-in agent was configured with an unusable spec.
    #[error("invalid agent spec: {0}")]
    InvalidSpec(String),
}

impl AgentError {
    /// Whether the engine may invoke the agent again for the same task.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
