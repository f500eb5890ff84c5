pub mod access;
pub mod cancel;
pub mod enqueue;
pub mod error_codes;
pub mod executor;
pub mod handler;
pub mod lifecycle;
pub mod memory;
pub mod model;
pub mod progress;
pub mod repo;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod task;

pub use access::{JobPage, JobReader, Requester};
pub use cancel::CancellationGate;
pub use enqueue::{EnqueueDefaults, Enqueuer};
pub use executor::{ExecutionMode, ExecutionOutcome, Executor, SKIPPED_RESULT};
pub use handler::{boxed, HandlerOptions, HandlerRegistry, JobError, TaskContext};
pub use lifecycle::LifecycleController;
pub use memory::MemoryJobStore;
pub use model::{Completion, Job, JobCounts, JobFilter, NewJob};
pub use progress::ProgressReporter;
pub use repo::PgJobStore;
pub use retry::{Backoff, RetryConfig};
pub use scheduler::{ClaimScheduler, PollerConfig, TickOutcome};
pub use state::{JobEvent, JobStatus};
pub use store::{JobStore, SharedStore};
