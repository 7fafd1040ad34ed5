//! Error types for the orchestration layer and configuration, plus the
//! crate-level error that wraps every subsystem.
//!
//! Interpreter, theory, provider, and generator errors live next to their
//! modules and are re-exported here.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub use crate::generator::GeneratorError;
pub use crate::interpreter::InterpreterError;
pub use crate::provider::ProviderError;
pub use crate::theory::TheoryError;

use crate::generator::Capability;

/// Top-level error for callers that do not care which subsystem failed.
#[derive(Debug, Error)]
pub enum CadenzaError {
    /// Interpretation failed.
    #[error("interpreter error: {0}")]
    Interpreter(#[from] InterpreterError),

    /// Musical content could not be rendered.
    #[error("theory error: {0}")]
    Theory(#[from] TheoryError),

    /// Provider call failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A generator failed.
    #[error("generator error: {0}")]
    Generator(#[from] GeneratorError),

    /// The orchestrator failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Convenience result alias for crate-level operations.
pub type Result<T> = std::result::Result<T, CadenzaError>;

/// One generator task that did not contribute to the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    /// Capability of the failed task.
    pub capability: Capability,
    /// Rendered error.
    pub message: String,
    /// Whether the task stopped because of cancellation.
    pub cancelled: bool,
}

impl TaskFailure {
    /// Record a generator error.
    pub fn from_error(err: &GeneratorError) -> Self {
        Self {
            capability: err.capability(),
            message: err.to_string(),
            cancelled: matches!(err, GeneratorError::Cancelled { .. }),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn summarize(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The request is not about music production. Expected and user-facing.
    #[error("this request is outside what I can help with")]
    OutOfScope,

    /// The fallback classifier failed and the keywords found nothing.
    #[error("request classification failed: {0}")]
    Classification(#[source] ProviderError),

    /// Every launched generator failed.
    #[error("every generator failed: {}", summarize(.failures))]
    TotalFailure {
        /// One entry per launched task.
        failures: Vec<TaskFailure>,
    },

    /// The request was cancelled before any generator produced output.
    #[error("request cancelled")]
    Cancelled,

    /// No generator is registered for a selected capability.
    #[error("no generator registered for {0}")]
    MissingGenerator(Capability),
}

impl OrchestratorError {
    /// Whether the error is an expected outcome to show the user verbatim
    /// rather than an internal failure.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::OutOfScope)
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read or written.
    #[error("config file {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// File content was not valid JSON for the expected shape.
    #[error("invalid JSON in {path}: {source}")]
    Parse {
        /// File involved (or `<embedded>`).
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// An environment override had an unusable value.
    #[error("environment variable {var}: {reason}")]
    Env {
        /// Variable name.
        var: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// The keyword table is unusable.
    #[error("keyword table: {0}")]
    Keywords(String),
}

/// Convenience result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_out_of_scope_is_user_facing() {
        assert!(OrchestratorError::OutOfScope.is_user_facing());
        assert!(!OrchestratorError::Cancelled.is_user_facing());
        let total = OrchestratorError::TotalFailure {
            failures: vec![TaskFailure {
                capability: Capability::Daw,
                message: "daw: cancelled".into(),
                cancelled: true,
            }],
        };
        assert!(!total.is_user_facing());
        assert_eq!(total.to_string(), "every generator failed: daw: cancelled");
    }
}
