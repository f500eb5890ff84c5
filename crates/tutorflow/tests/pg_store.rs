mod common;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use chrono::Duration;
use common::{clock, counting_registry, grade_payload, setup_db, store_queue, test_config};
use serial_test::serial;
use tutorflow::jobs::task::GRADE;
use tutorflow::jobs::{
    Completion, JobFilter, JobStatus, JobStore, NewJob, PgJobStore, Requester, TickOutcome,
};
use tutorflow::Clock;

#[tokio::test]
#[serial]
async fn pg_claims_in_priority_order_once() {
    let Some(pool) = setup_db().await else {
        return;
    };
    let clock = clock();
    let store = Arc::new(PgJobStore::new(pool.clone()));
    let queue = store_queue(
        store.clone(),
        counting_registry(Arc::new(AtomicUsize::new(0))),
        &clock,
        test_config(),
    );

    let low = queue
        .enqueue(NewJob::new(GRADE, grade_payload()).priority(1))
        .await
        .unwrap();
    let high = queue
        .enqueue(NewJob::new(GRADE, grade_payload()).priority(10))
        .await
        .unwrap();

    let eligible = store.eligible(clock.now(), 10).await.unwrap();
    let order: Vec<_> = eligible.iter().map(|j| j.id).collect();
    assert_eq!(order, vec![high.id, low.id]);

    let lease = clock.now() + Duration::minutes(5);
    let claimed = store
        .try_claim(high.id, "w1", clock.now(), lease)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.status, JobStatus::Started);
    assert_eq!(claimed.attempt, 1);
    assert!(store
        .try_claim(high.id, "w2", clock.now(), lease)
        .await
        .unwrap()
        .is_none());

    // fenced on attempt
    assert!(store
        .complete(high.id, 7, &Completion::succeeded("nope"), clock.now())
        .await
        .unwrap()
        .is_none());
    assert!(store
        .update_progress(high.id, 1, 30, clock.now())
        .await
        .unwrap());
    assert!(!store
        .update_progress(high.id, 1, 10, clock.now())
        .await
        .unwrap());

    let done = store
        .complete(high.id, 1, &Completion::succeeded("graded"), clock.now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.completed_at, Some(clock.now()));
}

#[tokio::test]
#[serial]
async fn pg_full_cycle_through_queue() {
    let Some(pool) = setup_db().await else {
        return;
    };
    let clock = clock();
    let queue = store_queue(
        Arc::new(PgJobStore::new(pool)),
        counting_registry(Arc::new(AtomicUsize::new(0))),
        &clock,
        test_config(),
    );
    let owner = Requester::user("student-1");

    let delayed = queue
        .enqueue(
            NewJob::new(GRADE, grade_payload())
                .owner("student-1")
                .title("Lab report 100%_done")
                .start_after(clock.now() + Duration::seconds(10)),
        )
        .await
        .unwrap();
    let other = queue
        .enqueue(NewJob::new(GRADE, grade_payload()).owner("student-2"))
        .await
        .unwrap();

    // other is due now, delayed is not
    match queue.tick().await.unwrap() {
        TickOutcome::Executed { job_id, .. } => assert_eq!(job_id, other.id),
        TickOutcome::Idle => panic!("expected the due job"),
    }
    assert_eq!(queue.tick().await.unwrap(), TickOutcome::Idle);

    let page = queue
        .list(
            JobFilter {
                title_contains: Some("100%_".into()),
                ..JobFilter::default()
            },
            &Requester::admin("ops"),
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, delayed.id);

    let mine = queue.list(JobFilter::default(), &owner).await.unwrap();
    assert_eq!(mine.items.len(), 1);

    let canceled = queue.cancel(delayed.id, &owner, None).await.unwrap();
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert!(canceled.completed_at.is_some());

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.canceled, 1);
    assert_eq!(counts.queued, 0);
}
