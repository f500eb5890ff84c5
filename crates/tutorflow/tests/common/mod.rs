#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use sqlx::{postgres::PgPoolOptions, PgPool};

use tutorflow::jobs::task::{handler_options, GradePayload, CENSOR, GRADE, REPORT};
use tutorflow::jobs::{
    boxed, HandlerOptions, HandlerRegistry, JobError, MemoryJobStore, RetryConfig, SharedStore,
};
use tutorflow::{JobQueue, ManualClock, QueueConfig};

pub fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap())
}

pub fn grade_payload() -> Value {
    json!({"tenantId": "tenant-1", "assignmentId": "hw-3"})
}

/// Retries after exactly one second, no jitter.
pub fn test_config() -> QueueConfig {
    QueueConfig {
        worker_id: "test-worker".to_string(),
        poll_interval: Duration::from_millis(20),
        reap_interval: Duration::from_millis(50),
        handler_timeout: Some(Duration::from_secs(5)),
        drain_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            base_seconds: 1,
            max_seconds: 60,
            jitter_pct: 0.0,
            ..RetryConfig::default()
        },
        ..QueueConfig::default()
    }
}

pub fn memory_queue(registry: HandlerRegistry, clock: &ManualClock, cfg: QueueConfig) -> JobQueue {
    JobQueue::builder(MemoryJobStore::arc())
        .registry(registry)
        .config(cfg)
        .clock(Arc::new(clock.clone()))
        .build()
}

pub fn store_queue(
    store: SharedStore,
    registry: HandlerRegistry,
    clock: &ManualClock,
    cfg: QueueConfig,
) -> JobQueue {
    JobQueue::builder(store)
        .registry(registry)
        .config(cfg)
        .clock(Arc::new(clock.clone()))
        .build()
}

/// grade/report/censor handlers that succeed and count their calls.
pub fn counting_registry(calls: Arc<AtomicUsize>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for kind in [GRADE, REPORT, CENSOR] {
        let calls = calls.clone();
        registry.register_with_options(
            kind,
            move |ctx| {
                let calls = calls.clone();
                boxed(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ctx.progress.report(50).await;
                    Ok(format!("done {}", ctx.job.id))
                })
            },
            handler_options(kind),
        );
    }
    registry
}

/// A grade handler that fails with `code` for the first `failures` calls.
pub fn flaky_registry(failures: usize, code: &'static str) -> (HandlerRegistry, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = HandlerRegistry::new();
    let counter = calls.clone();
    registry.register_typed::<GradePayload, _>(
        GRADE,
        move |ctx| {
            let counter = counter.clone();
            boxed(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                ctx.progress.report(40).await;
                if n < failures {
                    Err(JobError::new(code, format!("grader unavailable (call {})", n + 1)))
                } else {
                    Ok("graded".to_string())
                }
            })
        },
        HandlerOptions::new(),
    );
    (registry, calls)
}

/// `None` when TEST_DATABASE_URL is not set, so Postgres tests skip.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping Postgres test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query("TRUNCATE TABLE jobs")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}
