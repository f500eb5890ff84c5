// crates/tutorflow/src/jobs/repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::jobs::model::{Completion, Job, JobCounts, JobFilter};
use crate::jobs::state::JobStatus;
use crate::jobs::store::JobStore;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    status: String,
    task_kind: String,
    payload_json: Value,
    title: Option<String>,
    owners: Vec<String>,
    priority: i32,
    start_after: DateTime<Utc>,
    attempt: i32,
    max_attempts: i32,

    started_at: Option<DateTime<Utc>>,
    progress: i32,
    completed_at: Option<DateTime<Utc>>,
    result: Option<String>,

    locked_by: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|reason| QueueError::CorruptRecord { id: row.id, reason })?;

        Ok(Job {
            id: row.id,
            status,
            task_kind: row.task_kind,
            payload: row.payload_json,
            title: row.title,
            owners: row.owners,
            priority: row.priority,
            start_after: row.start_after,
            attempt: row.attempt,
            max_attempts: row.max_attempts,
            started_at: row.started_at,
            progress: row.progress,
            completed_at: row.completed_at,
            result: row.result,
            locked_by: row.locked_by,
            lease_expires_at: row.lease_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

fn into_job(row: Option<JobRow>) -> Result<Option<Job>> {
    row.map(Job::try_from).transpose()
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>> {
    rows.into_iter().map(Job::try_from).collect()
}

/// `%` and `_` in user search text are literal.
fn escape_like(q: &str) -> String {
    q.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// PostgreSQL-backed store. All transitions are single conditional
/// `UPDATE ... WHERE status = ... RETURNING *` statements.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: Job) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (
                id, status, task_kind, payload_json, title, owners,
                priority, start_after, attempt, max_attempts,
                progress, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.task_kind)
        .bind(&job.payload)
        .bind(&job.title)
        .bind(&job.owners)
        .bind(job.priority)
        .bind(job.start_after)
        .bind(job.attempt)
        .bind(job.max_attempts)
        .bind(job.progress)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        into_job(row)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM jobs WHERE deleted_at IS NULL");

        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(kind) = &filter.task_kind {
            qb.push(" AND task_kind = ").push_bind(kind.clone());
        }
        if let Some(owner) = &filter.owner {
            qb.push(" AND ").push_bind(owner.clone()).push(" = ANY(owners)");
        }
        if let Some(q) = &filter.title_contains {
            qb.push(" AND title ILIKE ")
                .push_bind(format!("%{}%", escape_like(q)));
        }
        if let Some((created_at, id)) = filter.cursor {
            qb.push(" AND (created_at, id) < (")
                .push_bind(created_at)
                .push(", ")
                .push_bind(id)
                .push(")");
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit());

        let rows = qb
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await?;

        into_jobs(rows)
    }

    async fn eligible(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT *
            FROM jobs
            WHERE status = 'queued'
              AND start_after <= $1
              AND deleted_at IS NULL
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        into_jobs(rows)
    }

    async fn try_claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        // The status check in WHERE is the compare-and-swap: of two racing
        // claimers only one sees status = 'queued'.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'started',
                attempt = attempt + 1,
                started_at = COALESCE(started_at, $2),
                progress = 0,
                locked_by = $3,
                lease_expires_at = $4,
                updated_at = $2
            WHERE id = $1
              AND status = 'queued'
              AND start_after <= $2
              AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(worker_id)
        .bind(lease_until)
        .fetch_optional(&self.pool)
        .await?;

        into_job(row)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        attempt: i32,
        progress: i32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET progress = $3,
                updated_at = $4
            WHERE id = $1
              AND status = 'started'
              AND attempt = $2
              AND progress < $3
              AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(progress)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn extend_lease(
        &self,
        id: Uuid,
        attempt: i32,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = $3,
                updated_at = $4
            WHERE id = $1
              AND status = 'started'
              AND attempt = $2
              AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(lease_until)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn complete(
        &self,
        id: Uuid,
        attempt: i32,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $3,
                completed_at = $4,
                progress = CASE WHEN $5 THEN 100 ELSE progress END,
                locked_by = NULL,
                lease_expires_at = NULL,
                updated_at = $4
            WHERE id = $1
              AND status = 'started'
              AND attempt = $2
              AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(&completion.result)
        .bind(now)
        .bind(completion.succeeded)
        .fetch_optional(&self.pool)
        .await?;

        into_job(row)
    }

    async fn requeue(
        &self,
        id: Uuid,
        attempt: i32,
        start_after: DateTime<Utc>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'queued',
                progress = 0,
                start_after = $3,
                result = COALESCE($4, result),
                locked_by = NULL,
                lease_expires_at = NULL,
                updated_at = $5
            WHERE id = $1
              AND status = 'started'
              AND attempt = $2
              AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(start_after)
        .bind(note)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        into_job(row)
    }

    async fn cancel(
        &self,
        id: Uuid,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'canceled',
                completed_at = $3,
                result = COALESCE($2, result),
                updated_at = $3
            WHERE id = $1
              AND status = 'queued'
              AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(note)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        into_job(row)
    }

    async fn expired_leases(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT *
            FROM jobs
            WHERE status = 'started'
              AND lease_expires_at IS NOT NULL
              AND lease_expires_at < $1
              AND deleted_at IS NULL
            ORDER BY lease_expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        into_jobs(rows)
    }

    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET deleted_at = $2,
                updated_at = $2
            WHERE id = $1
              AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn counts(&self) -> Result<JobCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*)
            FROM jobs
            WHERE deleted_at IS NULL
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = JobCounts::default();
        for (status, n) in rows {
            if let Ok(status) = status.parse::<JobStatus>() {
                counts.add(status, n);
            }
        }
        Ok(counts)
    }
}
