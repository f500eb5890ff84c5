use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{sync::Semaphore, task::JoinHandle, time::timeout};

use crate::error::QueueError;
use crate::jobs::error_codes::{BAD_PAYLOAD, PANIC, TIMEOUT, WORKER_SHUTDOWN};
use crate::jobs::model::Job;
use crate::jobs::progress::ProgressReporter;

pub type BoxFuture<T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'static>>;
type HandlerFn = dyn Fn(TaskContext) -> BoxFuture<Result<String, JobError>> + Send + Sync;
type PayloadValidator = dyn Fn(&Value) -> Result<(), String> + Send + Sync;

/// Failure reported by a handler. Recovered by the executor, never by callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct JobError {
    pub code: &'static str,
    pub message: String,
}

impl JobError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// What a handler gets to work with.
#[derive(Clone)]
pub struct TaskContext {
    pub job: Job,
    pub progress: ProgressReporter,
}

impl TaskContext {
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(self.job.payload.clone())
            .map_err(|e| JobError::new(BAD_PAYLOAD, e.to_string()))
    }
}

#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<HandlerFn>,
    pub semaphore: Option<Arc<Semaphore>>,
    pub timeout: Option<Duration>,
    pub cancelable: bool,
    validator: Option<Arc<PayloadValidator>>,
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("timeout", &self.timeout)
            .field("cancelable", &self.cancelable)
            .field("limited", &self.semaphore.is_some())
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, task_kind: &str, handler: F)
    where
        F: Fn(TaskContext) -> BoxFuture<Result<String, JobError>> + Send + Sync + 'static,
    {
        self.register_with_options(task_kind, handler, HandlerOptions::new());
    }

    pub fn register_with_timeout<F>(&mut self, task_kind: &str, handler: F, timeout_dur: Duration)
    where
        F: Fn(TaskContext) -> BoxFuture<Result<String, JobError>> + Send + Sync + 'static,
    {
        self.register_with_options(task_kind, handler, HandlerOptions::new().timeout(timeout_dur));
    }

    pub fn register_with_options<F>(&mut self, task_kind: &str, handler: F, opts: HandlerOptions)
    where
        F: Fn(TaskContext) -> BoxFuture<Result<String, JobError>> + Send + Sync + 'static,
    {
        self.insert(task_kind, Arc::new(handler), opts, None);
    }

    /// Like `register_with_options`, and enqueue rejects payloads that do not
    /// deserialize into `P`.
    pub fn register_typed<P, F>(&mut self, task_kind: &str, handler: F, opts: HandlerOptions)
    where
        P: DeserializeOwned + 'static,
        F: Fn(TaskContext) -> BoxFuture<Result<String, JobError>> + Send + Sync + 'static,
    {
        let validator: Arc<PayloadValidator> = Arc::new(|payload: &Value| {
            P::deserialize(payload).map(|_| ()).map_err(|e| e.to_string())
        });
        self.insert(task_kind, Arc::new(handler), opts, Some(validator));
    }

    fn insert(
        &mut self,
        task_kind: &str,
        handler: Arc<HandlerFn>,
        opts: HandlerOptions,
        validator: Option<Arc<PayloadValidator>>,
    ) {
        let semaphore = opts
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        self.handlers.insert(
            task_kind.to_string(),
            HandlerEntry {
                handler,
                semaphore,
                timeout: opts.timeout,
                cancelable: opts.cancelable,
                validator,
            },
        );
    }

    pub fn handler_for(&self, task_kind: &str) -> Option<HandlerEntry> {
        self.handlers.get(task_kind).cloned()
    }

    pub fn contains(&self, task_kind: &str) -> bool {
        self.handlers.contains_key(task_kind)
    }

    pub fn task_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Kinds without a registered handler are cancelable; they can never run anyway.
    pub fn is_cancelable(&self, task_kind: &str) -> bool {
        self.handlers
            .get(task_kind)
            .map_or(true, |entry| entry.cancelable)
    }

    pub fn validate(&self, task_kind: &str, payload: &Value) -> Result<(), QueueError> {
        let entry = self
            .handlers
            .get(task_kind)
            .ok_or_else(|| QueueError::InvalidTaskKind(task_kind.to_string()))?;

        if let Some(validator) = &entry.validator {
            validator(payload).map_err(|reason| QueueError::invalid_payload(task_kind, reason))?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct HandlerOptions {
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
    cancelable: bool,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self {
            max_concurrency: None,
            timeout: None,
            cancelable: true,
        }
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }

    pub fn cancelable(mut self, cancelable: bool) -> Self {
        self.cancelable = cancelable;
        self
    }
}

impl HandlerEntry {
    /// Run the handler on its own task so a panic or a timeout surfaces as a
    /// `JobError` instead of tearing down the poll loop.
    pub async fn run(
        &self,
        ctx: TaskContext,
        default_timeout: Option<Duration>,
    ) -> Result<String, JobError> {
        let _permit = if let Some(sem) = &self.semaphore {
            Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| JobError::new(WORKER_SHUTDOWN, "handler semaphore closed"))?,
            )
        } else {
            None
        };

        let mut task = AbortOnDrop(tokio::spawn((self.handler)(ctx)));
        let joined = match self.timeout.or(default_timeout) {
            Some(dur) => match timeout(dur, &mut task.0).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(JobError::new(
                        TIMEOUT,
                        format!("handler timeout after {}ms", dur.as_millis()),
                    ));
                }
            },
            None => (&mut task.0).await,
        };

        match joined {
            Ok(res) => res,
            Err(e) if e.is_panic() => Err(JobError::new(PANIC, panic_message(e.into_panic()))),
            Err(e) => Err(JobError::new(WORKER_SHUTDOWN, e.to_string())),
        }
    }
}

/// Aborts the handler task on timeout, or when the caller is dropped mid-run
/// (a poll loop aborted by `stop`).
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

pub fn boxed<T>(fut: impl std::future::Future<Output = T> + Send + 'static) -> BoxFuture<T> {
    Box::pin(fut)
}
