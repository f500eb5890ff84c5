//! In-memory job store for tests and embedded use.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::model::{Completion, Job, JobCounts, JobFilter};
use crate::jobs::state::{JobEvent, JobStatus};
use crate::jobs::store::JobStore;

struct Entry {
    /// Insertion order; breaks created_at ties in claim order.
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Entry>,
    next_seq: u64,
}

impl MemoryState {
    fn live_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        self.jobs
            .get_mut(&id)
            .map(|e| &mut e.job)
            .filter(|j| j.deleted_at.is_none())
    }
}

/// Arena table keyed by id. The mutex makes every conditional write atomic.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> Result<Job> {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(
            job.id,
            Entry {
                seq,
                job: job.clone(),
            },
        );
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .get(&id)
            .map(|e| &e.job)
            .filter(|j| j.deleted_at.is_none())
            .cloned())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        let needle = filter.title_contains.as_ref().map(|q| q.to_lowercase());

        let mut rows: Vec<&Job> = state
            .jobs
            .values()
            .map(|e| &e.job)
            .filter(|j| j.deleted_at.is_none())
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| filter.task_kind.as_ref().map_or(true, |k| &j.task_kind == k))
            .filter(|j| filter.owner.as_ref().map_or(true, |o| j.is_owned_by(o)))
            .filter(|j| {
                needle.as_ref().map_or(true, |n| {
                    j.title
                        .as_ref()
                        .is_some_and(|t| t.to_lowercase().contains(n.as_str()))
                })
            })
            .filter(|j| filter.cursor.map_or(true, |c| (j.created_at, j.id) < c))
            .collect();

        rows.sort_by_key(|j| Reverse((j.created_at, j.id)));
        Ok(rows
            .into_iter()
            .take(filter.limit() as usize)
            .cloned()
            .collect())
    }

    async fn eligible(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        let mut rows: Vec<&Entry> = state
            .jobs
            .values()
            .filter(|e| {
                e.job.status == JobStatus::Queued
                    && e.job.deleted_at.is_none()
                    && e.job.start_after <= now
            })
            .collect();

        rows.sort_by_key(|e| (Reverse(e.job.priority), e.job.created_at, e.seq));
        Ok(rows
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|e| e.job.clone())
            .collect())
    }

    async fn try_claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.live_mut(id) else {
            return Ok(None);
        };
        if job.start_after > now {
            return Ok(None);
        }
        let Ok(next) = job.status.apply(JobEvent::Claim) else {
            return Ok(None);
        };

        job.status = next;
        job.attempt += 1;
        job.started_at.get_or_insert(now);
        job.progress = 0;
        job.locked_by = Some(worker_id.to_string());
        job.lease_expires_at = Some(lease_until);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn update_progress(
        &self,
        id: Uuid,
        attempt: i32,
        progress: i32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.live_mut(id) {
            Some(job)
                if job.status == JobStatus::Started
                    && job.attempt == attempt
                    && job.progress < progress =>
            {
                job.progress = progress;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend_lease(
        &self,
        id: Uuid,
        attempt: i32,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.live_mut(id) {
            Some(job) if job.status == JobStatus::Started && job.attempt == attempt => {
                job.lease_expires_at = Some(lease_until);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(
        &self,
        id: Uuid,
        attempt: i32,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let event = if completion.succeeded {
            JobEvent::Succeed
        } else {
            JobEvent::Fail { retry: false }
        };

        let mut state = self.state.lock().await;
        let Some(job) = state.live_mut(id).filter(|j| j.attempt == attempt) else {
            return Ok(None);
        };
        let Ok(next) = job.status.apply(event) else {
            return Ok(None);
        };

        job.status = next;
        job.result = Some(completion.result.clone());
        job.completed_at = Some(now);
        if completion.succeeded {
            job.progress = 100;
        }
        job.locked_by = None;
        job.lease_expires_at = None;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn requeue(
        &self,
        id: Uuid,
        attempt: i32,
        start_after: DateTime<Utc>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.live_mut(id).filter(|j| j.attempt == attempt) else {
            return Ok(None);
        };
        let Ok(next) = job.status.apply(JobEvent::Fail { retry: true }) else {
            return Ok(None);
        };

        job.status = next;
        job.progress = 0;
        job.start_after = start_after;
        if let Some(note) = note {
            job.result = Some(note.to_string());
        }
        job.locked_by = None;
        job.lease_expires_at = None;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn cancel(
        &self,
        id: Uuid,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.live_mut(id) else {
            return Ok(None);
        };
        let Ok(next) = job.status.apply(JobEvent::Cancel) else {
            return Ok(None);
        };

        job.status = next;
        job.completed_at = Some(now);
        if let Some(note) = note {
            job.result = Some(note.to_string());
        }
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn expired_leases(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Job> = state
            .jobs
            .values()
            .map(|e| &e.job)
            .filter(|j| {
                j.status == JobStatus::Started
                    && j.deleted_at.is_none()
                    && j.lease_expires_at.is_some_and(|t| t < now)
            })
            .cloned()
            .collect();

        rows.sort_by_key(|j| j.lease_expires_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.live_mut(id) {
            Some(job) => {
                job.deleted_at = Some(now);
                job.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn counts(&self) -> Result<JobCounts> {
        let state = self.state.lock().await;
        let mut counts = JobCounts::default();
        for job in state.jobs.values().map(|e| &e.job) {
            if job.deleted_at.is_none() {
                counts.add(job.status, 1);
            }
        }
        Ok(counts)
    }
}
