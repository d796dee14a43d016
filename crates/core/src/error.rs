use crate::status::JobStatus;

/// Domain-level error taxonomy shared by every job kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    /// Probe-time failure: the tool binary or its device is missing.
    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Wrong artefact or media type supplied.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Internal error: {0}")]
    Internal(String),
}
