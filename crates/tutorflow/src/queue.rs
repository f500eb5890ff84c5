//! The assembled queue: one store, one registry, and the components that
//! share them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::jobs::{
    CancellationGate, ClaimScheduler, EnqueueDefaults, Enqueuer, ExecutionMode, Executor,
    HandlerRegistry, Job, JobCounts, JobFilter, JobPage, JobReader, LifecycleController, NewJob,
    PollerConfig, Requester, RetryConfig, SharedStore, TickOutcome,
};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub poll_concurrency: usize,
    pub candidate_batch: i64,
    /// Renewed on every reap pass while the job runs here, so it must be
    /// longer than `reap_interval`.
    pub lease: Duration,
    pub reap_interval: Duration,
    pub handler_timeout: Option<Duration>,
    pub drain_timeout: Duration,
    pub default_priority: i32,
    pub default_max_attempts: i32,
    pub max_payload_bytes: usize,
    pub execution_mode: ExecutionMode,
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            poll_interval: Duration::from_secs(1),
            poll_concurrency: 1,
            candidate_batch: 10,
            lease: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
            handler_timeout: Some(Duration::from_secs(60)),
            drain_timeout: Duration::from_secs(30),
            default_priority: 0,
            default_max_attempts: 3,
            max_payload_bytes: 256 * 1024,
            execution_mode: ExecutionMode::Live,
            retry: RetryConfig::default(),
        }
    }
}

impl QueueConfig {
    fn poller(&self) -> PollerConfig {
        PollerConfig {
            worker_id: self.worker_id.clone(),
            interval: self.poll_interval,
            concurrency: self.poll_concurrency,
            candidate_batch: self.candidate_batch,
            lease: self.lease,
            ..PollerConfig::default()
        }
    }

    fn enqueue_defaults(&self) -> EnqueueDefaults {
        EnqueueDefaults {
            priority: self.default_priority,
            max_attempts: self.default_max_attempts,
            max_payload_bytes: self.max_payload_bytes,
        }
    }
}

pub struct JobQueue {
    store: SharedStore,
    registry: Arc<HandlerRegistry>,
    enqueuer: Enqueuer,
    reader: JobReader,
    gate: CancellationGate,
    scheduler: ClaimScheduler,
    lifecycle: LifecycleController,
}

impl JobQueue {
    pub fn builder(store: SharedStore) -> JobQueueBuilder {
        JobQueueBuilder::new(store)
    }

    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job> {
        self.enqueuer.enqueue(new_job).await
    }

    pub async fn get(&self, id: Uuid, requester: &Requester) -> Result<Job> {
        self.reader.get(id, requester).await
    }

    pub async fn list(&self, filter: JobFilter, requester: &Requester) -> Result<JobPage> {
        self.reader.list(filter, requester).await
    }

    pub async fn cancel(&self, id: Uuid, requester: &Requester, note: Option<String>) -> Result<Job> {
        self.gate.cancel(id, requester, note).await
    }

    pub async fn counts(&self) -> Result<JobCounts> {
        self.store.counts().await
    }

    /// Run one scheduler tick on the caller's task. Useful when the
    /// background loops are not started.
    pub async fn tick(&self) -> Result<TickOutcome> {
        self.scheduler.tick().await
    }

    pub async fn reap_expired(&self) -> Result<u64> {
        self.scheduler.reap_expired().await
    }

    pub async fn start(&self) -> bool {
        self.lifecycle.start().await
    }

    pub async fn stop(&self) -> bool {
        self.lifecycle.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.is_running().await
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
}

pub struct JobQueueBuilder {
    store: SharedStore,
    registry: HandlerRegistry,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl JobQueueBuilder {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            registry: HandlerRegistry::new(),
            config: QueueConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> JobQueue {
        let Self {
            store,
            registry,
            config,
            clock,
        } = self;
        let registry = Arc::new(registry);
        let wake = Arc::new(Notify::new());

        if config.execution_mode == ExecutionMode::Skip {
            tracing::warn!("execution mode is skip: handlers will not run");
        }
        if config.reap_interval >= config.lease {
            tracing::warn!(
                reap_interval_ms = config.reap_interval.as_millis() as u64,
                lease_ms = config.lease.as_millis() as u64,
                "reap interval is not shorter than the lease; running jobs can be reaped"
            );
        }

        let enqueuer = Enqueuer::new(
            store.clone(),
            registry.clone(),
            clock.clone(),
            config.enqueue_defaults(),
        )
        .with_wake(wake.clone());
        let executor = Executor::new(
            store.clone(),
            registry.clone(),
            config.retry.clone(),
            clock.clone(),
        )
        .with_mode(config.execution_mode)
        .with_default_timeout(config.handler_timeout);
        let scheduler = ClaimScheduler::new(store.clone(), executor, clock.clone(), config.poller());
        let lifecycle = LifecycleController::new(
            scheduler.clone(),
            wake,
            config.reap_interval,
            config.drain_timeout,
        );

        JobQueue {
            reader: JobReader::new(store.clone()),
            gate: CancellationGate::new(store.clone(), registry.clone(), clock),
            enqueuer,
            scheduler,
            lifecycle,
            registry,
            store,
        }
    }
}
