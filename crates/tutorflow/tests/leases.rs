mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Duration;
use common::{clock, counting_registry, grade_payload, memory_queue, test_config};
use tokio::sync::Notify;
use tutorflow::jobs::error_codes::LEASE_EXPIRED;
use tutorflow::jobs::task::GRADE;
use tutorflow::jobs::{boxed, ExecutionOutcome, HandlerRegistry, JobStatus, NewJob, TickOutcome};
use tutorflow::{Clock, QueueConfig};

#[tokio::test]
async fn expired_lease_is_requeued() {
    let clock = clock();
    let queue = memory_queue(
        counting_registry(Arc::new(AtomicUsize::new(0))),
        &clock,
        test_config(),
    );
    let store = queue.store().clone();

    let job = queue.enqueue(NewJob::new(GRADE, grade_payload())).await.unwrap();
    // a worker claims it and then disappears
    store
        .try_claim(job.id, "crashed-worker", clock.now(), clock.now() + Duration::seconds(30))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(queue.reap_expired().await.unwrap(), 0, "lease still valid");

    clock.advance(Duration::seconds(31));
    assert_eq!(queue.reap_expired().await.unwrap(), 1);

    let reaped = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(reaped.status, JobStatus::Queued);
    assert_eq!(reaped.attempt, 1);
    assert!(reaped.locked_by.is_none());
    assert!(reaped.result.unwrap().contains(LEASE_EXPIRED));

    clock.advance(Duration::seconds(1));
    match queue.tick().await.unwrap() {
        TickOutcome::Executed { job_id, outcome } => {
            assert_eq!(job_id, job.id);
            assert_eq!(outcome, ExecutionOutcome::Completed);
        }
        TickOutcome::Idle => panic!("reaped job should run again"),
    }
    assert_eq!(store.get(job.id).await.unwrap().unwrap().attempt, 2);
}

#[tokio::test]
async fn expired_lease_on_last_attempt_fails_the_job() {
    let clock = clock();
    let queue = memory_queue(
        counting_registry(Arc::new(AtomicUsize::new(0))),
        &clock,
        test_config(),
    );
    let store = queue.store().clone();

    let job = queue
        .enqueue(NewJob::new(GRADE, grade_payload()).max_attempts(1))
        .await
        .unwrap();
    store
        .try_claim(job.id, "crashed-worker", clock.now(), clock.now() + Duration::seconds(30))
        .await
        .unwrap()
        .unwrap();

    clock.advance(Duration::minutes(5));
    assert_eq!(queue.reap_expired().await.unwrap(), 1);

    let failed = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Completed);
    assert_eq!(failed.completed_at, Some(clock.now()));
    assert!(failed.result.unwrap().starts_with("FAILED"));
    assert_ne!(failed.progress, 100);
}

#[tokio::test]
async fn running_job_is_renewed_not_reaped() {
    let clock = clock();
    let release = Arc::new(Notify::new());
    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut registry = HandlerRegistry::new();
    {
        let (release, active, max_seen) = (release.clone(), active.clone(), max_seen.clone());
        registry.register(GRADE, move |_ctx| {
            let (release, active, max_seen) = (release.clone(), active.clone(), max_seen.clone());
            boxed(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                release.notified().await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok("graded".to_string())
            })
        });
    }
    let cfg = QueueConfig {
        handler_timeout: None,
        lease: std::time::Duration::from_secs(60),
        ..test_config()
    };
    let queue = Arc::new(memory_queue(registry, &clock, cfg));
    let store = queue.store().clone();
    let job = queue.enqueue(NewJob::new(GRADE, grade_payload())).await.unwrap();

    let first = tokio::spawn({
        let queue = queue.clone();
        async move { queue.tick().await.unwrap() }
    });
    while active.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    clock.advance(Duration::seconds(61));
    assert_eq!(queue.reap_expired().await.unwrap(), 0, "live job must not be reaped");
    let renewed = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(renewed.status, JobStatus::Started);
    assert_eq!(renewed.attempt, 1);
    assert_eq!(renewed.lease_expires_at, Some(clock.now() + Duration::seconds(60)));

    clock.advance(Duration::seconds(5));
    assert_eq!(queue.tick().await.unwrap(), TickOutcome::Idle);

    release.notify_one();
    match first.await.unwrap() {
        TickOutcome::Executed { job_id, outcome } => {
            assert_eq!(job_id, job.id);
            assert_eq!(outcome, ExecutionOutcome::Completed);
        }
        TickOutcome::Idle => panic!("first tick should have run the job"),
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(store.get(job.id).await.unwrap().unwrap().attempt, 1);
}
