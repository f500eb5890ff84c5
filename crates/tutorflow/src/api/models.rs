use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::{Job, JobStatus};

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub task_kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub owners: Vec<String>,
    pub title: Option<String>,
    pub priority: Option<i32>,
    pub start_after: Option<DateTime<Utc>>,
    pub max_attempts: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub task_kind: Option<String>,
    pub title: Option<String>,
    pub limit: Option<i64>,
    pub cursor_created_at: Option<DateTime<Utc>>,
    pub cursor_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    pub note: Option<String>,
}

/// Listing row; the payload is left out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListItem {
    pub id: Uuid,
    pub task_kind: String,
    pub status: JobStatus,
    pub title: Option<String>,
    pub priority: i32,
    pub start_after: DateTime<Utc>,
    pub attempt: i32,
    pub max_attempts: i32,
    pub progress: i32,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobListItem {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            task_kind: job.task_kind,
            status: job.status,
            title: job.title,
            priority: job.priority,
            start_after: job.start_after,
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            progress: job.progress,
            result: job.result,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub items: Vec<JobListItem>,
    pub next_cursor_created_at: Option<DateTime<Utc>>,
    pub next_cursor_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
