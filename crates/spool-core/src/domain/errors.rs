//! Errors and their classification.

use thiserror::Error;

use super::state::JobState;

/// Operational classification of a [`QueueError`].
///
/// - Validation: malformed request, rejected before any write
/// - NotFound: referenced id is absent
/// - Conflict: lost a guard, duplicate id, wrong state for the operation
/// - Execution: the command failed or timed out. Classification only: a
///   failed run comes back as an `Outcome` and is never returned as an `Err`
/// - Store: persistence layer unavailable or rejected the write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Execution,
    Store,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("illegal transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobState,
        to: JobState,
    },

    #[error("store error: {0}")]
    Store(String),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Validation(_) => ErrorKind::Validation,
            QueueError::NotFound { .. } => ErrorKind::NotFound,
            QueueError::Conflict(_) | QueueError::InvalidTransition { .. } => ErrorKind::Conflict,
            QueueError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn job_not_found(id: impl ToString) -> Self {
        QueueError::NotFound {
            entity: "job",
            id: id.to_string(),
        }
    }

    pub fn worker_not_found(id: impl ToString) -> Self {
        QueueError::NotFound {
            entity: "worker",
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
