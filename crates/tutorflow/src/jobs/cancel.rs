use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{QueueError, Result};
use crate::jobs::access::Requester;
use crate::jobs::handler::HandlerRegistry;
use crate::jobs::model::Job;
use crate::jobs::state::JobEvent;
use crate::jobs::store::SharedStore;

/// QUEUED -> CANCELED for owners and admins. Work in flight is never interrupted.
#[derive(Clone)]
pub struct CancellationGate {
    store: SharedStore,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
}

impl CancellationGate {
    pub fn new(store: SharedStore, registry: Arc<HandlerRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            registry,
            clock,
        }
    }

    pub async fn cancel(&self, id: Uuid, requester: &Requester, note: Option<String>) -> Result<Job> {
        let job = self.store.get(id).await?.ok_or(QueueError::NotFound(id))?;
        if !job.is_visible_to(requester) {
            return Err(QueueError::Unauthorized(id));
        }
        job.status.apply(JobEvent::Cancel)?;
        if !self.registry.is_cancelable(&job.task_kind) {
            return Err(QueueError::NotCancelable {
                task_kind: job.task_kind,
            });
        }

        let note = note.unwrap_or_else(|| format!("canceled by {}", requester.user_id));
        match self.store.cancel(id, Some(&note), self.clock.now()).await? {
            Some(canceled) => {
                tracing::info!(job_id = %id, user_id = %requester.user_id, "job canceled");
                Ok(canceled)
            }
            None => {
                // claimed (or canceled) between the read and the write
                let current = self.store.get(id).await?.ok_or(QueueError::NotFound(id))?;
                tracing::debug!(job_id = %id, status = %current.status, "cancel lost race");
                Err(QueueError::InvalidTransition {
                    from: current.status,
                    event: JobEvent::Cancel,
                })
            }
        }
    }
}
