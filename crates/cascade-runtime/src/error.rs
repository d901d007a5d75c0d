//! Error types for the orchestration runtime.

use thiserror::Error;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur during agent orchestration.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A cron start expression failed to parse.
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// A scheduled-cron deployment is missing its start expression.
    #[error("Deployment '{0}' is scheduled but has no cron expression")]
    MissingCronExpression(String),

    /// Persistence collaborator failure.
    #[error("Store error: {0}")]
    Store(#[from] cascade_types::Error),

    /// Flow runtime collaborator failure.
    #[error("Flow runtime error: {0}")]
    Flow(String),
}

/// The message of the deepest error in `err`'s source chain.
///
/// Deployment failure messages carry the root cause, not the chain of
/// wrappers around it.
pub fn root_cause_message(err: &(dyn std::error::Error + 'static)) -> String {
    let mut cause = err;
    while let Some(source) = cause.source() {
        cause = source;
    }
    cause.to_string()
}
