use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::jobs::model::{Job, JobFilter};
use crate::jobs::store::SharedStore;

/// Identity of whoever reads or cancels a job. Authentication happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: String,
    pub is_admin: bool,
}

impl Requester {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub next_cursor: Option<(chrono::DateTime<chrono::Utc>, Uuid)>,
}

/// Read model: owners and admins only.
#[derive(Clone)]
pub struct JobReader {
    store: SharedStore,
}

impl JobReader {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: Uuid, requester: &Requester) -> Result<Job> {
        let job = self.store.get(id).await?.ok_or(QueueError::NotFound(id))?;
        if !job.is_visible_to(requester) {
            return Err(QueueError::Unauthorized(id));
        }
        Ok(job)
    }

    pub async fn list(&self, mut filter: JobFilter, requester: &Requester) -> Result<JobPage> {
        if !requester.is_admin {
            filter.owner = Some(requester.user_id.clone());
        }

        let items = self.store.list(&filter).await?;
        let next_cursor = if items.len() as i64 == filter.limit() {
            items.last().map(|j| (j.created_at, j.id))
        } else {
            None
        };

        Ok(JobPage { items, next_cursor })
    }
}
