mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Duration;
use common::{clock, counting_registry, grade_payload, memory_queue, test_config};
use serde_json::json;
use tutorflow::jobs::task::{CENSOR, GRADE};
use tutorflow::jobs::{JobEvent, JobStatus, NewJob, Requester, TickOutcome};
use tutorflow::{Clock, QueueError};
use uuid::Uuid;

fn censor_payload() -> serde_json::Value {
    json!({"tenantId": "t1", "userLocale": "en", "parent": "thread-9", "contentId": "post-2"})
}

#[tokio::test]
async fn owner_cancels_queued_job() {
    let clock = clock();
    let calls = Arc::new(AtomicUsize::new(0));
    let queue = memory_queue(counting_registry(calls.clone()), &clock, test_config());

    let job = queue
        .enqueue(NewJob::new(GRADE, grade_payload()).owner("student-1"))
        .await
        .unwrap();

    clock.advance(Duration::seconds(3));
    let canceled = queue
        .cancel(job.id, &Requester::user("student-1"), Some("resubmitted".into()))
        .await
        .unwrap();

    assert_eq!(canceled.status, JobStatus::Canceled);
    assert_eq!(canceled.completed_at, Some(clock.now()));
    assert_eq!(canceled.result.as_deref(), Some("resubmitted"));

    // terminal: never claimed afterwards
    assert_eq!(queue.tick().await.unwrap(), TickOutcome::Idle);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn admin_may_cancel_any_job() {
    let clock = clock();
    let queue = memory_queue(
        counting_registry(Arc::new(AtomicUsize::new(0))),
        &clock,
        test_config(),
    );
    let job = queue
        .enqueue(NewJob::new(GRADE, grade_payload()).owner("student-1"))
        .await
        .unwrap();

    let canceled = queue.cancel(job.id, &Requester::admin("tutor-1"), None).await.unwrap();
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert_eq!(canceled.result.as_deref(), Some("canceled by tutor-1"));
}

#[tokio::test]
async fn stranger_cannot_cancel() {
    let clock = clock();
    let queue = memory_queue(
        counting_registry(Arc::new(AtomicUsize::new(0))),
        &clock,
        test_config(),
    );
    let job = queue
        .enqueue(NewJob::new(GRADE, grade_payload()).owner("student-1"))
        .await
        .unwrap();

    let err = queue
        .cancel(job.id, &Requester::user("student-2"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Unauthorized(id) if id == job.id));

    let unchanged = queue.store().get(job.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, JobStatus::Queued);
}

#[tokio::test]
async fn started_job_cannot_be_canceled() {
    let clock = clock();
    let queue = memory_queue(
        counting_registry(Arc::new(AtomicUsize::new(0))),
        &clock,
        test_config(),
    );
    let job = queue
        .enqueue(NewJob::new(GRADE, grade_payload()).owner("student-1"))
        .await
        .unwrap();
    let started = queue
        .store()
        .try_claim(job.id, "w1", clock.now(), clock.now() + Duration::minutes(5))
        .await
        .unwrap()
        .unwrap();

    let err = queue
        .cancel(job.id, &Requester::user("student-1"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            from: JobStatus::Started,
            event: JobEvent::Cancel
        }
    ));
    assert!(err.is_user_error());

    let after = queue.store().get(job.id).await.unwrap().unwrap();
    assert_eq!(after, started);
}

#[tokio::test]
async fn terminal_jobs_cannot_be_canceled() {
    let clock = clock();
    let queue = memory_queue(
        counting_registry(Arc::new(AtomicUsize::new(0))),
        &clock,
        test_config(),
    );
    let owner = Requester::user("student-1");

    let done = queue
        .enqueue(NewJob::new(GRADE, grade_payload()).owner("student-1"))
        .await
        .unwrap();
    queue.tick().await.unwrap();
    let completed = queue.get(done.id, &owner).await.unwrap();
    assert_eq!(completed.status, JobStatus::Completed);

    let err = queue.cancel(done.id, &owner, None).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            from: JobStatus::Completed,
            ..
        }
    ));
    assert_eq!(queue.get(done.id, &owner).await.unwrap(), completed);

    let twice = queue
        .enqueue(NewJob::new(GRADE, grade_payload()).owner("student-1"))
        .await
        .unwrap();
    let first = queue.cancel(twice.id, &owner, None).await.unwrap();
    clock.advance(Duration::seconds(5));
    let err = queue.cancel(twice.id, &owner, Some("again".into())).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            from: JobStatus::Canceled,
            ..
        }
    ));
    assert_eq!(queue.get(twice.id, &owner).await.unwrap(), first);
}

#[tokio::test]
async fn moderation_jobs_are_not_cancelable() {
    let clock = clock();
    let queue = memory_queue(
        counting_registry(Arc::new(AtomicUsize::new(0))),
        &clock,
        test_config(),
    );
    let job = queue
        .enqueue(NewJob::new(CENSOR, censor_payload()).owner("student-1"))
        .await
        .unwrap();

    let err = queue
        .cancel(job.id, &Requester::admin("tutor-1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::NotCancelable { ref task_kind } if task_kind == CENSOR));
}

#[tokio::test]
async fn finished_moderation_job_reports_the_status() {
    let clock = clock();
    let queue = memory_queue(
        counting_registry(Arc::new(AtomicUsize::new(0))),
        &clock,
        test_config(),
    );
    let job = queue
        .enqueue(NewJob::new(CENSOR, censor_payload()).owner("student-1"))
        .await
        .unwrap();
    queue.tick().await.unwrap();

    let err = queue
        .cancel(job.id, &Requester::admin("tutor-1"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            from: JobStatus::Completed,
            event: JobEvent::Cancel,
        }
    ));
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let clock = clock();
    let queue = memory_queue(
        counting_registry(Arc::new(AtomicUsize::new(0))),
        &clock,
        test_config(),
    );

    let id = Uuid::new_v4();
    let err = queue.cancel(id, &Requester::admin("tutor-1"), None).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(missing) if missing == id));
}
