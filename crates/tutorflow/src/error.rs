use thiserror::Error;
use uuid::Uuid;

use crate::jobs::state::{JobEvent, JobStatus};

/// Errors surfaced synchronously by the queue (enqueue, read, cancel) and by
/// the persistence layer.
///
/// Handler failures never show up here: the executor recovers them and
/// records the outcome on the job itself.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("unknown task kind: {0}")]
    InvalidTaskKind(String),

    #[error("invalid payload for task kind {task_kind}: {reason}")]
    InvalidPayload { task_kind: String, reason: String },

    #[error("cannot {event} a job that is {from}")]
    InvalidTransition { from: JobStatus, event: JobEvent },

    #[error("jobs of kind {task_kind} cannot be canceled")]
    NotCancelable { task_kind: String },

    #[error("requester is not allowed to access job {0}")]
    Unauthorized(Uuid),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("corrupt job record {id}: {reason}")]
    CorruptRecord { id: Uuid, reason: String },

    #[error("error while serializing payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn invalid_payload(task_kind: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            task_kind: task_kind.to_string(),
            reason: reason.into(),
        }
    }

    /// Validation failures the caller caused, as opposed to infrastructure faults.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTaskKind(_)
                | Self::InvalidPayload { .. }
                | Self::InvalidTransition { .. }
                | Self::NotCancelable { .. }
                | Self::Unauthorized(_)
                | Self::NotFound(_)
        )
    }
}

pub type Result<T> = core::result::Result<T, QueueError>;
