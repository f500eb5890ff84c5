//! Job lifecycle state machine.
//!
//! ```text
//! QUEUED --claim--> STARTED --succeed--------------> COMPLETED
//!                      |----fail (attempts left)---> QUEUED
//!                      `----fail (exhausted)-------> COMPLETED (failure result)
//! QUEUED --cancel--> CANCELED
//! ```
//!
//! COMPLETED and CANCELED are terminal. A failed job is recorded as COMPLETED
//! with a failure result rather than a dedicated state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Completed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Completed => "completed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Canceled)
    }

    /// Next status for `event`, or `InvalidTransition` if the table has no such edge.
    pub fn apply(self, event: JobEvent) -> Result<JobStatus, QueueError> {
        let next = match (self, event) {
            (JobStatus::Queued, JobEvent::Claim) => JobStatus::Started,
            (JobStatus::Started, JobEvent::Succeed) => JobStatus::Completed,
            (JobStatus::Started, JobEvent::Fail { retry: true }) => JobStatus::Queued,
            (JobStatus::Started, JobEvent::Fail { retry: false }) => JobStatus::Completed,
            (JobStatus::Queued, JobEvent::Cancel) => JobStatus::Canceled,
            (from, event) => return Err(QueueError::InvalidTransition { from, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "started" => Ok(JobStatus::Started),
            "completed" => Ok(JobStatus::Completed),
            "canceled" => Ok(JobStatus::Canceled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Claim,
    Succeed,
    /// `retry` is true when the job still has attempts left.
    Fail { retry: bool },
    Cancel,
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobEvent::Claim => "claim",
            JobEvent::Succeed => "complete",
            JobEvent::Fail { .. } => "fail",
            JobEvent::Cancel => "cancel",
        };
        f.write_str(name)
    }
}
