use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::access::Requester;
use crate::jobs::state::JobStatus;
use crate::jobs::task::TaskPayload;

/// One unit of scheduled work and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub task_kind: String,
    pub payload: Value,
    pub title: Option<String>,
    pub owners: Vec<String>,
    pub priority: i32,
    pub start_after: DateTime<Utc>,
    pub attempt: i32,
    pub max_attempts: i32,

    pub started_at: Option<DateTime<Utc>>,
    pub progress: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,

    pub locked_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owners.iter().any(|o| o == user_id)
    }

    pub fn is_visible_to(&self, requester: &Requester) -> bool {
        requester.is_admin || self.is_owned_by(&requester.user_id)
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

/// Enqueue request. Unset fields fall back to the queue defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
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

impl NewJob {
    pub fn new(task_kind: impl Into<String>, payload: Value) -> Self {
        Self {
            task_kind: task_kind.into(),
            payload,
            ..Self::default()
        }
    }

    pub fn for_task(task: TaskPayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(task.kind(), task.to_value()?))
    }

    pub fn owner(mut self, user_id: impl Into<String>) -> Self {
        self.owners.push(user_id.into());
        self
    }

    pub fn owners<I, S>(mut self, owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.owners.extend(owners.into_iter().map(Into::into));
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn start_after(mut self, at: DateTime<Utc>) -> Self {
        self.start_after = Some(at);
        self
    }

    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// How a STARTED job leaves the executor for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub result: String,
    pub succeeded: bool,
}

impl Completion {
    pub fn succeeded(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            succeeded: true,
        }
    }

    pub fn failed(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            succeeded: false,
        }
    }
}

/// Listing filter. `owner` restricts to jobs that user owns.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub task_kind: Option<String>,
    pub owner: Option<String>,
    pub title_contains: Option<String>,
    pub limit: Option<i64>,
    /// Cursor is (created_at, id) of the last item of the previous page.
    pub cursor: Option<(DateTime<Utc>, Uuid)>,
}

impl JobFilter {
    pub const DEFAULT_LIMIT: i64 = 100;

    /// Clamped to [1, 500].
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 500)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: i64,
    pub started: i64,
    pub completed: i64,
    pub canceled: i64,
}

impl JobCounts {
    pub fn add(&mut self, status: JobStatus, n: i64) {
        match status {
            JobStatus::Queued => self.queued += n,
            JobStatus::Started => self.started += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Canceled => self.canceled += n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_limit_is_clamped() {
        assert_eq!(JobFilter::default().limit(), 100);
        let f = JobFilter {
            limit: Some(10_000),
            ..JobFilter::default()
        };
        assert_eq!(f.limit(), 500);
        let f = JobFilter {
            limit: Some(0),
            ..JobFilter::default()
        };
        assert_eq!(f.limit(), 1);
    }

    #[test]
    fn new_job_builder_collects_fields() {
        let at = Utc::now();
        let job = NewJob::new("grade", json!({"k": 1}))
            .owner("u1")
            .owners(["u2", "u3"])
            .priority(5)
            .start_after(at)
            .max_attempts(2)
            .title("homework 3");

        assert_eq!(job.owners, vec!["u1", "u2", "u3"]);
        assert_eq!(job.priority, Some(5));
        assert_eq!(job.start_after, Some(at));
        assert_eq!(job.max_attempts, Some(2));
        assert_eq!(job.title.as_deref(), Some("homework 3"));
    }
}
