use std::sync::Arc;

use tokio::sync::Notify;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{QueueError, Result};
use crate::jobs::handler::HandlerRegistry;
use crate::jobs::model::{Job, NewJob};
use crate::jobs::state::JobStatus;
use crate::jobs::store::SharedStore;

#[derive(Debug, Clone)]
pub struct EnqueueDefaults {
    pub priority: i32,
    pub max_attempts: i32,
    pub max_payload_bytes: usize,
}

impl Default for EnqueueDefaults {
    fn default() -> Self {
        Self {
            priority: 0,
            max_attempts: 3,
            max_payload_bytes: 256 * 1024,
        }
    }
}

/// Validates and persists new work as QUEUED.
#[derive(Clone)]
pub struct Enqueuer {
    store: SharedStore,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    defaults: EnqueueDefaults,
    wake: Option<Arc<Notify>>,
}

impl Enqueuer {
    pub fn new(
        store: SharedStore,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
        defaults: EnqueueDefaults,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            defaults,
            wake: None,
        }
    }

    /// Poke this after every insert so idle pollers look again.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job> {
        let task_kind = new_job.task_kind.trim();
        if task_kind.is_empty() || !self.registry.contains(task_kind) {
            return Err(QueueError::InvalidTaskKind(new_job.task_kind.clone()));
        }
        self.registry.validate(task_kind, &new_job.payload)?;

        let size = serde_json::to_vec(&new_job.payload)?.len();
        if size > self.defaults.max_payload_bytes {
            return Err(QueueError::invalid_payload(
                task_kind,
                format!(
                    "payload is {size} bytes, limit is {}",
                    self.defaults.max_payload_bytes
                ),
            ));
        }

        let max_attempts = new_job.max_attempts.unwrap_or(self.defaults.max_attempts);
        if max_attempts < 1 {
            return Err(QueueError::invalid_payload(
                task_kind,
                format!("max_attempts must be at least 1, got {max_attempts}"),
            ));
        }

        let now = self.clock.now();
        let mut owners = new_job.owners;
        owners.sort();
        owners.dedup();

        let job = Job {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            task_kind: task_kind.to_string(),
            payload: new_job.payload,
            title: new_job.title,
            owners,
            priority: new_job.priority.unwrap_or(self.defaults.priority),
            start_after: new_job.start_after.unwrap_or(now),
            attempt: 0,
            max_attempts,
            started_at: None,
            progress: 0,
            completed_at: None,
            result: None,
            locked_by: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let job = self.store.insert(job).await?;
        tracing::info!(
            job_id = %job.id,
            task_kind = %job.task_kind,
            priority = job.priority,
            start_after = %job.start_after,
            "job enqueued"
        );

        if let Some(wake) = &self.wake {
            wake.notify_one();
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::jobs::handler::{boxed, HandlerOptions};
    use crate::jobs::memory::MemoryJobStore;
    use crate::jobs::task::{GradePayload, GRADE};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn enqueuer(clock: ManualClock, defaults: EnqueueDefaults) -> Enqueuer {
        let mut registry = HandlerRegistry::new();
        registry.register_typed::<GradePayload, _>(
            GRADE,
            |_ctx| boxed(async { Ok("graded".to_string()) }),
            HandlerOptions::new(),
        );
        Enqueuer::new(
            MemoryJobStore::arc(),
            Arc::new(registry),
            Arc::new(clock),
            defaults,
        )
    }

    fn grade_payload() -> serde_json::Value {
        json!({"tenantId": "t1", "assignmentId": "a1"})
    }

    #[tokio::test]
    async fn applies_defaults() {
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        let q = enqueuer(clock, EnqueueDefaults::default());

        let job = q
            .enqueue(NewJob::new(GRADE, grade_payload()).owner("u2").owner("u1").owner("u2"))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.priority, 0);
        assert_eq!(job.start_after, now);
        assert_eq!(job.progress, 0);
        assert!(job.completed_at.is_none());
        assert_eq!(job.owners, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn keeps_future_start_after() {
        let clock = ManualClock::new(Utc::now());
        let later = clock.now() + Duration::days(10);
        let q = enqueuer(clock, EnqueueDefaults::default());

        let job = q
            .enqueue(NewJob::new(GRADE, grade_payload()).start_after(later))
            .await
            .unwrap();
        assert_eq!(job.start_after, later);
    }

    #[tokio::test]
    async fn rejects_unknown_and_blank_kinds() {
        let q = enqueuer(ManualClock::default(), EnqueueDefaults::default());

        for kind in ["", "   ", "sync"] {
            let err = q.enqueue(NewJob::new(kind, json!({}))).await.unwrap_err();
            assert!(matches!(err, QueueError::InvalidTaskKind(_)), "{kind:?}");
        }
    }

    #[tokio::test]
    async fn rejects_bad_payloads() {
        let q = enqueuer(
            ManualClock::default(),
            EnqueueDefaults {
                max_payload_bytes: 64,
                ..EnqueueDefaults::default()
            },
        );

        let err = q
            .enqueue(NewJob::new(GRADE, json!({"tenantId": "t1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload { .. }));

        let err = q
            .enqueue(NewJob::new(GRADE, grade_payload()).max_attempts(0))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload { .. }));

        let big = json!({"tenantId": "t".repeat(100), "assignmentId": "a1"});
        let err = q.enqueue(NewJob::new(GRADE, big)).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn wakes_pollers() {
        let wake = Arc::new(Notify::new());
        let q = enqueuer(ManualClock::default(), EnqueueDefaults::default()).with_wake(wake.clone());

        q.enqueue(NewJob::new(GRADE, grade_payload())).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_millis(100), wake.notified())
            .await
            .expect("enqueue should store a wake permit");
    }
}
