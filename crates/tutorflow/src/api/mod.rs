use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::api::models::{
    CancelQuery, EnqueueRequest, ErrorBody, JobListItem, ListJobsQuery, ListJobsResponse,
};
use crate::error::QueueError;
use crate::jobs::{Job, JobCounts, JobFilter, JobStatus, NewJob, Requester};
use crate::queue::JobQueue;

pub mod models;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Clone)]
pub struct ApiState {
    pub queue: Arc<JobQueue>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs).post(enqueue_job))
        .route("/jobs/:id", get(get_job).delete(cancel_job))
        .route("/metrics", get(metrics))
        .route("/metrics/prom", get(metrics_prom))
        .route("/health", get(health))
        .with_state(state)
}

pub struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        Self(e)
    }
}

fn error_response(status: StatusCode, error: &str, message: String) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            message,
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            QueueError::InvalidTaskKind(_) => (StatusCode::BAD_REQUEST, "invalid_task_kind"),
            QueueError::InvalidPayload { .. } => (StatusCode::BAD_REQUEST, "invalid_payload"),
            QueueError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_payload"),
            QueueError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
            QueueError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            QueueError::InvalidTransition { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition")
            }
            QueueError::NotCancelable { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "not_cancelable")
            }
            QueueError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            QueueError::CorruptRecord { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        error_response(status, error, self.0.to_string())
    }
}

/// Identity comes from a trusted upstream that sets `x-user-id` and,
/// for administrators, `x-user-role: admin`.
#[async_trait]
impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let Some(user_id) = header(USER_ID_HEADER) else {
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                format!("missing {USER_ID_HEADER} header"),
            ));
        };

        let is_admin = header(USER_ROLE_HEADER).is_some_and(|r| r.eq_ignore_ascii_case("admin"));
        Ok(Requester {
            user_id: user_id.to_string(),
            is_admin,
        })
    }
}

pub async fn enqueue_job(
    State(state): State<ApiState>,
    requester: Requester,
    Json(body): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let EnqueueRequest {
        task_kind,
        payload,
        owners,
        title,
        priority,
        start_after,
        max_attempts,
    } = body;

    let new_job = NewJob {
        task_kind,
        payload,
        owners,
        title,
        priority,
        start_after,
        max_attempts,
    }
    .owner(requester.user_id);

    let job = state.queue.enqueue(new_job).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job(
    State(state): State<ApiState>,
    requester: Requester,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.queue.get(id, &requester).await?))
}

pub async fn cancel_job(
    State(state): State<ApiState>,
    requester: Requester,
    Path(id): Path<Uuid>,
    Query(q): Query<CancelQuery>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.queue.cancel(id, &requester, q.note).await?))
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    requester: Requester,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, Response> {
    let status = match q.status.as_deref() {
        Some(s) => Some(s.parse::<JobStatus>().map_err(|e| {
            error_response(StatusCode::BAD_REQUEST, "invalid_status", e)
        })?),
        None => None,
    };

    let filter = JobFilter {
        status,
        task_kind: q.task_kind,
        owner: None,
        title_contains: q.title,
        limit: q.limit,
        cursor: q.cursor_created_at.zip(q.cursor_id),
    };

    let page = state
        .queue
        .list(filter, &requester)
        .await
        .map_err(|e| ApiError(e).into_response())?;

    let (next_cursor_created_at, next_cursor_id) = page.next_cursor.unzip();
    Ok(Json(ListJobsResponse {
        items: page.items.into_iter().map(JobListItem::from).collect(),
        next_cursor_created_at,
        next_cursor_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub now_utc: chrono::DateTime<Utc>,
    pub running: bool,
    pub counts: JobCounts,
}

pub async fn metrics(State(state): State<ApiState>) -> Result<Json<MetricsResponse>, ApiError> {
    let counts = state.queue.counts().await?;
    Ok(Json(MetricsResponse {
        now_utc: Utc::now(),
        running: state.queue.is_running().await,
        counts,
    }))
}

pub async fn metrics_prom(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let counts = state.queue.counts().await?;

    let mut body = String::from(
        "# HELP tutorflow_jobs Number of live jobs by status\n# TYPE tutorflow_jobs gauge\n",
    );
    for (status, n) in [
        (JobStatus::Queued, counts.queued),
        (JobStatus::Started, counts.started),
        (JobStatus::Completed, counts.completed),
        (JobStatus::Canceled, counts.canceled),
    ] {
        body.push_str(&format!("tutorflow_jobs{{status=\"{status}\"}} {n}\n"));
    }

    Ok((StatusCode::OK, body).into_response())
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
