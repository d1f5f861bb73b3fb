//! Typed error hierarchy for quorum.
//!
//! Three enums cover the three places where callers need to tell failures apart:
//! - `ModelError`: a model call failed; only `Transient` is worth retrying
//! - `ToolError`: one tool invocation failed; always reported back to the model
//! - `TickError`: the tick itself failed and the agent must stop
//!
//! A fully-approved PR is not an error. It is reported as
//! [`TickOutcome::Paused`](crate::engine::TickOutcome::Paused).

use thiserror::Error;

/// Errors from a model provider call.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Provider hiccup (timeout, overload, dropped connection). Retried with backoff.
    #[error("Transient model error: {0}")]
    Transient(String),

    /// The request or the response is unusable. Never retried.
    #[error("Model error: {0}")]
    Fatal(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Transient(_))
    }
}

/// Errors from a single tool invocation.
///
/// None of these abort a tick: the dispatcher turns each one into an
/// error-flagged tool result so the model can see it on its next turn.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Cannot review your own pull request #{pr_number}")]
    SelfReview { pr_number: i64 },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::InvalidArguments(err.to_string())
    }
}

/// Errors that end a tick and must be surfaced to the operator.
#[derive(Debug, Error)]
pub enum TickError {
    /// The current turn alone exceeds the model budget and cannot be truncated further.
    #[error("Context overflow: the current turn needs {required} tokens but the budget is {budget}")]
    ContextOverflow { budget: usize, required: usize },

    /// The model kept failing after all retry attempts.
    #[error("Model call failed after {attempts} attempt(s): {source}")]
    Model {
        attempts: u32,
        #[source]
        source: ModelError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
