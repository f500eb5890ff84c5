//! Persistence seam for job records.
//!
//! Every state change is one conditional write against the store: the
//! row is only touched if it is still in the expected status (and, for
//! executor-side writes, still on the expected attempt). A write that
//! matches nothing returns `None`/`false` instead of an error.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::model::{Completion, Job, JobCounts, JobFilter};

pub type SharedStore = Arc<dyn JobStore>;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<Job>;

    /// Soft-deleted records are treated as absent.
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// Newest first, cursor-paginated on (created_at, id).
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Claim candidates: QUEUED, `start_after <= now`, not deleted; ordered by
    /// priority desc then age asc.
    async fn eligible(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>>;

    /// QUEUED -> STARTED if the job is still queued and eligible. Bumps
    /// `attempt`, sets `started_at` on the first claim, takes a lease.
    /// `None` means somebody else got there first.
    async fn try_claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Job>>;

    /// Raise `progress` for a STARTED job on `attempt`. Never lowers it.
    async fn update_progress(
        &self,
        id: Uuid,
        attempt: i32,
        progress: i32,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Push the lease of a STARTED job on `attempt` out to `lease_until`.
    /// `false` means the attempt is no longer the live one.
    async fn extend_lease(
        &self,
        id: Uuid,
        attempt: i32,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// STARTED -> COMPLETED for `attempt`.
    async fn complete(
        &self,
        id: Uuid,
        attempt: i32,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>>;

    /// STARTED -> QUEUED for `attempt`, progress back to 0, eligible again at
    /// `start_after`.
    async fn requeue(
        &self,
        id: Uuid,
        attempt: i32,
        start_after: DateTime<Utc>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>>;

    /// QUEUED -> CANCELED.
    async fn cancel(&self, id: Uuid, note: Option<&str>, now: DateTime<Utc>)
        -> Result<Option<Job>>;

    /// STARTED jobs whose lease ran out before `now`.
    async fn expired_leases(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>>;

    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn counts(&self) -> Result<JobCounts>;
}
