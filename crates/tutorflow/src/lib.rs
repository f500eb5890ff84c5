pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod queue;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QueueError, Result};
pub use queue::{JobQueue, JobQueueBuilder, QueueConfig};
