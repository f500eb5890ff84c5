use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::Result;
use crate::jobs::{
    error_codes::{LEASE_EXPIRED, UNKNOWN_TASK_KIND},
    handler::{HandlerRegistry, JobError, TaskContext},
    model::{Completion, Job},
    progress::ProgressReporter,
    retry::{classify_error, next_delay_seconds, ErrorClass, RetryConfig},
    store::SharedStore,
};

/// Result string written by `ExecutionMode::Skip`.
pub const SKIPPED_RESULT: &str = "Skip Execution in Test Mode";

/// `Skip` completes every claimed job without calling its handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Live,
    Skip,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "live" => Ok(ExecutionMode::Live),
            "skip" | "test" => Ok(ExecutionMode::Skip),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Skipped,
    Retrying { start_after: DateTime<Utc> },
    Failed { code: String },
    /// The job moved on (reaped, or finished by another attempt) before our write landed.
    Superseded,
}

#[derive(Clone)]
pub struct Executor {
    store: SharedStore,
    registry: Arc<HandlerRegistry>,
    retry_cfg: RetryConfig,
    mode: ExecutionMode,
    clock: Arc<dyn Clock>,
    default_timeout: Option<Duration>,
}

impl Executor {
    pub fn new(
        store: SharedStore,
        registry: Arc<HandlerRegistry>,
        retry_cfg: RetryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            retry_cfg,
            mode: ExecutionMode::Live,
            clock,
            default_timeout: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run a job the caller has just claimed. Handler failures end up on the
    /// job record; only store errors come back as `Err`.
    pub async fn execute(&self, job: Job) -> Result<ExecutionOutcome> {
        if self.mode == ExecutionMode::Skip {
            let done = self
                .store
                .complete(job.id, job.attempt, &Completion::succeeded(SKIPPED_RESULT), self.clock.now())
                .await?;
            return Ok(match done {
                Some(_) => ExecutionOutcome::Skipped,
                None => ExecutionOutcome::Superseded,
            });
        }

        let Some(entry) = self.registry.handler_for(&job.task_kind) else {
            tracing::error!(job_id = %job.id, task_kind = %job.task_kind, "no handler registered");
            let err = JobError::new(
                UNKNOWN_TASK_KIND,
                format!("no handler registered for task kind {}", job.task_kind),
            );
            return self.on_failure(&job, err).await;
        };

        let progress = ProgressReporter::new(
            self.store.clone(),
            self.clock.clone(),
            job.id,
            job.attempt,
        );
        let ctx = TaskContext {
            job: job.clone(),
            progress,
        };

        match entry.run(ctx, self.default_timeout).await {
            Ok(result) => self.on_success(&job, result).await,
            Err(err) => self.on_failure(&job, err).await,
        }
    }

    async fn on_success(&self, job: &Job, result: String) -> Result<ExecutionOutcome> {
        let done = self
            .store
            .complete(job.id, job.attempt, &Completion::succeeded(result), self.clock.now())
            .await?;

        match done {
            Some(_) => {
                tracing::info!(job_id = %job.id, attempt = job.attempt, "job completed");
                Ok(ExecutionOutcome::Completed)
            }
            None => {
                tracing::warn!(job_id = %job.id, attempt = job.attempt, "completion superseded");
                Ok(ExecutionOutcome::Superseded)
            }
        }
    }

    /// Requeue with backoff while attempts remain and the error is retryable,
    /// otherwise complete with a failure result.
    pub async fn on_failure(&self, job: &Job, err: JobError) -> Result<ExecutionOutcome> {
        let class = classify_error(err.code);
        let can_retry = class == ErrorClass::Retryable && job.has_attempts_left();
        let now = self.clock.now();

        if can_retry {
            let mut rng = StdRng::from_entropy();
            let delay_secs = next_delay_seconds(job.attempt, &self.retry_cfg, &mut rng);
            let start_after = now + chrono::Duration::seconds(delay_secs);
            let note = format!("attempt {} failed: {err}", job.attempt);

            let requeued = self
                .store
                .requeue(job.id, job.attempt, start_after, Some(&note), now)
                .await?;
            return Ok(match requeued {
                Some(_) => {
                    tracing::warn!(
                        job_id = %job.id,
                        attempt = job.attempt,
                        code = err.code,
                        delay_secs,
                        "job failed, retrying"
                    );
                    ExecutionOutcome::Retrying { start_after }
                }
                None => ExecutionOutcome::Superseded,
            });
        }

        let reason = match class {
            ErrorClass::NonRetryable => "non-retryable",
            ErrorClass::Retryable => "attempts exhausted",
        };
        let result = format!("FAILED ({reason}) {err}");
        let done = self
            .store
            .complete(job.id, job.attempt, &Completion::failed(result), now)
            .await?;

        Ok(match done {
            Some(_) => {
                tracing::error!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    code = err.code,
                    message = %err.message,
                    reason,
                    "job failed"
                );
                ExecutionOutcome::Failed {
                    code: err.code.to_string(),
                }
            }
            None => ExecutionOutcome::Superseded,
        })
    }

    /// A STARTED job whose lease ran out counts as a failed attempt.
    pub async fn recover_expired(&self, job: &Job) -> Result<ExecutionOutcome> {
        let holder = job.locked_by.as_deref().unwrap_or("unknown");
        let err = JobError::new(LEASE_EXPIRED, format!("lease held by {holder} expired"));
        self.on_failure(job, err).await
    }
}
