//! Domain errors for the triage orchestration core.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the triage core.
///
/// Only the synchronous call surface (enqueue, decide, register) returns
/// these to callers. Failures inside a single task are captured as that
/// task's terminal state and never propagate here.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("Unknown task type: {0} (no handler registered)")]
    UnknownTaskType(String),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Approval request not found: {0}")]
    RequestNotFound(Uuid),

    #[error("Approval request {0} already decided")]
    AlreadyDecided(Uuid),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Task {0} has an open approval request")]
    ApprovalAlreadyOpen(Uuid),

    #[error("Workflow storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

pub type TriageResult<T> = Result<T, TriageError>;
