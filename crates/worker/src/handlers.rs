use std::time::Duration;

use tutorflow::jobs::error_codes::DEPENDENCY_DOWN;
use tutorflow::jobs::handler::BoxFuture;
use tutorflow::jobs::task::{
    handler_options, CensorPayload, GradePayload, RemoveObjectPayload, ReportPayload, CENSOR,
    GRADE, REMOVE_OBJECT, REPORT,
};
use tutorflow::jobs::{boxed, HandlerRegistry, JobError, TaskContext};

// Demo handlers: they walk through a few steps and report progress. Swap in
// the real grading / moderation / storage clients here.

fn censor(ctx: TaskContext) -> BoxFuture<Result<String, JobError>> {
    boxed(async move {
        let payload: CensorPayload = ctx.payload()?;
        simulate_steps(&ctx, 2).await;
        Ok(format!(
            "content {} under {} checked ({})",
            payload.content_id, payload.parent, payload.user_locale
        ))
    })
}

fn grade(ctx: TaskContext) -> BoxFuture<Result<String, JobError>> {
    boxed(async move {
        let payload: GradePayload = ctx.payload()?;
        simulate_steps(&ctx, 4).await;
        Ok(format!(
            "assignment {} graded for tenant {}",
            payload.assignment_id, payload.tenant_id
        ))
    })
}

fn report(ctx: TaskContext) -> BoxFuture<Result<String, JobError>> {
    boxed(async move {
        let payload: ReportPayload = ctx.payload()?;
        if payload.file.trim().is_empty() {
            return Err(JobError::new(DEPENDENCY_DOWN, "no report template given"));
        }
        simulate_steps(&ctx, 5).await;
        Ok(serde_json::json!({
            "file": payload.file,
            "tenantId": payload.tenant_id,
            "arg": payload.arg,
        })
        .to_string())
    })
}

fn remove_object(ctx: TaskContext) -> BoxFuture<Result<String, JobError>> {
    boxed(async move {
        let payload: RemoveObjectPayload = ctx.payload()?;
        simulate_steps(&ctx, 1).await;
        Ok(format!("removed {}", payload.url))
    })
}

async fn simulate_steps(ctx: &TaskContext, steps: i32) {
    for step in 1..=steps {
        tokio::time::sleep(Duration::from_millis(200)).await;
        ctx.progress.report(step * 100 / steps).await;
    }
}

pub fn build_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register_typed::<CensorPayload, _>(CENSOR, censor, handler_options(CENSOR));
    registry.register_typed::<GradePayload, _>(
        GRADE,
        grade,
        handler_options(GRADE).max_concurrency(8),
    );
    registry.register_typed::<ReportPayload, _>(
        REPORT,
        report,
        handler_options(REPORT)
            .max_concurrency(2)
            .timeout(Duration::from_secs(120)),
    );
    registry.register_typed::<RemoveObjectPayload, _>(
        REMOVE_OBJECT,
        remove_object,
        handler_options(REMOVE_OBJECT),
    );

    registry
}
