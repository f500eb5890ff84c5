use std::env;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use tutorflow::jobs::handler::BoxFuture;
use tutorflow::jobs::task::{
    handler_options, CensorPayload, GradePayload, RemoveObjectPayload, ReportPayload,
    TaskPayload, CENSOR, GRADE, REMOVE_OBJECT, REPORT,
};
use tutorflow::jobs::{
    boxed, HandlerRegistry, JobError, JobFilter, JobStatus, NewJob, PgJobStore,
    Requester, TaskContext,
};
use tutorflow::{db, JobQueue};

const USAGE: &str = "tutorflowctl <command>\n\
Commands:\n\
- migrate\n\
- reset\n\
- enqueue <task_kind> <payload_json> [owner...]\n\
- show <job_id>\n\
- list [status]\n\
- cancel <job_id> <user_id>\n\
- counts\n\
\n\
Uses TUTORFLOW_DATABASE_URL, DATABASE_URL or TEST_DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tutorflow::telemetry::init(false);
    let args: Vec<String> = env::args().collect();

    let Some(command) = args.get(1) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    dotenvy::dotenv().ok();
    let url = env::var("TUTORFLOW_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .context("TUTORFLOW_DATABASE_URL, DATABASE_URL or TEST_DATABASE_URL must be set")?;
    let pool = db::make_pool(&url).await?;

    // the operator acts as admin
    let operator = Requester::admin("tutorflowctl");

    match command.as_str() {
        "migrate" => {
            db::run_migrations(&pool).await?;
            println!("migrations applied");
        }
        "reset" => reset(&pool).await?,
        "enqueue" => {
            let kind = arg(&args, 2, "enqueue <task_kind> <payload_json> [owner...]")?;
            let payload: Value = serde_json::from_str(arg(&args, 3, "enqueue <task_kind> <payload_json>")?)
                .context("payload must be valid JSON")?;
            let task = TaskPayload::from_parts(kind, &payload)
                .ok_or_else(|| anyhow::anyhow!("unknown task kind: {kind}"))?
                .with_context(|| format!("payload does not match task kind {kind}"))?;
            let job = queue(&pool)
                .enqueue(NewJob::for_task(task)?.owners(args.iter().skip(4)))
                .await?;
            println!("enqueued {} ({})", job.id, job.task_kind);
        }
        "show" => {
            let id: Uuid = arg(&args, 2, "show <job_id>")?.parse()?;
            let job = queue(&pool).get(id, &operator).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        "list" => {
            let status = match args.get(2) {
                Some(s) => Some(s.parse::<JobStatus>().map_err(anyhow::Error::msg)?),
                None => None,
            };
            let filter = JobFilter {
                status,
                ..JobFilter::default()
            };
            let page = queue(&pool).list(filter, &operator).await?;
            for job in page.items {
                println!(
                    "{}  {:<10} {:<13} p={:<3} attempt={}/{} progress={:>3}% {}",
                    job.id,
                    job.status,
                    job.task_kind,
                    job.priority,
                    job.attempt,
                    job.max_attempts,
                    job.progress,
                    job.result.unwrap_or_default()
                );
            }
        }
        "cancel" => {
            let id: Uuid = arg(&args, 2, "cancel <job_id> <user_id>")?.parse()?;
            let user = arg(&args, 3, "cancel <job_id> <user_id>")?;
            let job = queue(&pool)
                .cancel(id, &Requester::user(user), None)
                .await?;
            println!("canceled {} at {:?}", job.id, job.completed_at);
        }
        "counts" => {
            let c = queue(&pool).counts().await?;
            println!(
                "jobs: queued={} started={} completed={} canceled={}",
                c.queued, c.started, c.completed, c.canceled
            );
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn arg<'a>(args: &'a [String], idx: usize, usage: &str) -> anyhow::Result<&'a str> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("usage: tutorflowctl {usage}"))
}

/// A queue that only validates and writes; its handlers never run here.
fn queue(pool: &PgPool) -> JobQueue {
    let store = Arc::new(PgJobStore::new(pool.clone()));
    JobQueue::builder(store).registry(validation_registry()).build()
}

fn validation_registry() -> HandlerRegistry {
    fn not_here(_: TaskContext) -> BoxFuture<Result<String, JobError>> {
        boxed(async { Err(JobError::new("WORKER_ONLY", "run by the worker process")) })
    }

    let mut registry = HandlerRegistry::new();
    registry.register_typed::<CensorPayload, _>(CENSOR, not_here, handler_options(CENSOR));
    registry.register_typed::<GradePayload, _>(GRADE, not_here, handler_options(GRADE));
    registry.register_typed::<ReportPayload, _>(REPORT, not_here, handler_options(REPORT));
    registry.register_typed::<RemoveObjectPayload, _>(
        REMOVE_OBJECT,
        not_here,
        handler_options(REMOVE_OBJECT),
    );
    registry
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("TRUNCATE TABLE jobs").execute(pool).await?;
    println!("reset OK");
    Ok(())
}
