use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::jobs::store::SharedStore;

/// Handed to a handler so it can publish a completion percentage.
///
/// Updates are best effort: a failed write is logged and dropped.
#[derive(Clone)]
pub struct ProgressReporter {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    job_id: Uuid,
    attempt: i32,
    last: Arc<AtomicI32>,
}

impl ProgressReporter {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, job_id: Uuid, attempt: i32) -> Self {
        Self {
            store,
            clock,
            job_id,
            attempt,
            last: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Clamped to 0..=100. Values at or below the last reported one are ignored.
    pub async fn report(&self, progress: i32) {
        let progress = progress.clamp(0, 100);
        let prev = self.last.fetch_max(progress, Ordering::SeqCst);
        if progress <= prev {
            return;
        }

        if let Err(e) = self
            .store
            .update_progress(self.job_id, self.attempt, progress, self.clock.now())
            .await
        {
            tracing::debug!(job_id = %self.job_id, progress, error = %e, "progress update dropped");
        }
    }

    pub fn last_reported(&self) -> i32 {
        self.last.load(Ordering::SeqCst)
    }
}
