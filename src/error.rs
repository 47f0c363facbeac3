//! Error types for pipeline preparation and execution.

use thiserror::Error;

use memflow_core::state::DataPipelineResult;

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The upload request was rejected before any step ran.
    #[error("Invalid upload request: {0}")]
    Validation(String),

    /// The pipeline cannot run as configured (unknown step, bad options).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A step reported `Failed`; later steps were not run.
    #[error("Step '{step}' failed: {reason}")]
    HandlerFailure { step: String, reason: String },

    /// The run was cancelled. Not an application failure.
    #[error("Pipeline run cancelled")]
    Cancelled,

    /// Reading an upload source failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn handler_failure(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandlerFailure {
            step: step.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The failing step name, for `HandlerFailure`.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::HandlerFailure { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// A run that stopped early, with the partial state left for diagnostics.
///
/// Nothing is rolled back: artifacts and context entries written before
/// the stop stay in `state`, and `state.complete` is `false`.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PipelineRunError {
    #[source]
    pub error: PipelineError,
    pub state: Box<DataPipelineResult>,
}

impl PipelineRunError {
    pub fn new(error: PipelineError, state: DataPipelineResult) -> Self {
        Self {
            error,
            state: Box::new(state),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }

    pub fn into_parts(self) -> (PipelineError, DataPipelineResult) {
        (self.error, *self.state)
    }
}

impl From<PipelineRunError> for PipelineError {
    fn from(err: PipelineRunError) -> Self {
        err.error
    }
}
