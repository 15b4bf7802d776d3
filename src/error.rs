use thiserror::Error;

use crate::vendor::AuthAcquisitionError;

/// The only errors that leave an invocation. The orchestrator acts on
/// [`error_type`](InvocationError::error_type) alone; messages are for humans.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("invalid invocation input: {0}")]
    InvalidInput(String),

    #[error("authentication failed: {0}")]
    AuthAcquisition(#[from] AuthAcquisitionError),

    #[error("task result '{task_id}' not found (404)")]
    ResourceNotFound { task_id: String },

    #[error("workflow not completed: {0}")]
    NotCompleted(String),

    #[error("workflow failed: {reason}. Errors: {errors:?}")]
    WorkflowFailed { reason: String, errors: Vec<String> },

    #[error("non-retriable failure: {0}")]
    NonRetriable(String),
}

impl InvocationError {
    /// Stable machine-readable name reported to the orchestrator.
    pub fn error_type(&self) -> &'static str {
        match self {
            InvocationError::InvalidInput(_) => "InvalidInputError",
            InvocationError::AuthAcquisition(_) => "AuthAcquisitionError",
            InvocationError::ResourceNotFound { .. } => "ResourceNotFoundError",
            InvocationError::NotCompleted(_) => "InvocationNotCompletedError",
            InvocationError::WorkflowFailed { .. } => "WorkflowFailedError",
            InvocationError::NonRetriable(_) => "NonRetriableInvocationError",
        }
    }

    /// Whether the orchestrator should invoke again later.
    pub fn is_retriable(&self) -> bool {
        matches!(self, InvocationError::NotCompleted(_))
    }

    /// Process exit code, following sysexits.h where one fits.
    pub fn exit_code(&self) -> i32 {
        match self {
            InvocationError::InvalidInput(_) => 64,
            InvocationError::WorkflowFailed { .. } => 65,
            InvocationError::ResourceNotFound { .. } => 66,
            InvocationError::NonRetriable(_) => 70,
            InvocationError::NotCompleted(_) => 75,
            InvocationError::AuthAcquisition(_) => 77,
        }
    }
}
