use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Result;
use crate::jobs::executor::{ExecutionOutcome, Executor};
use crate::jobs::model::Job;
use crate::jobs::store::SharedStore;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub worker_id: String,
    pub interval: Duration,
    /// Independent poll loops run by one lifecycle controller.
    pub concurrency: usize,
    /// How many eligible candidates one tick looks at before giving up.
    pub candidate_batch: i64,
    pub lease: Duration,
    pub reap_batch: i64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            interval: Duration::from_secs(1),
            concurrency: 1,
            candidate_batch: 10,
            lease: Duration::from_secs(300),
            reap_batch: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Executed {
        job_id: Uuid,
        outcome: ExecutionOutcome,
    },
}

/// Claims held by this process, job id to attempt.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashMap<Uuid, i32>>>);

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, i32>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self, job: &Job) -> InFlightGuard {
        self.lock().insert(job.id, job.attempt);
        InFlightGuard {
            in_flight: self.clone(),
            id: job.id,
            attempt: job.attempt,
        }
    }

    fn snapshot(&self) -> Vec<(Uuid, i32)> {
        self.lock().iter().map(|(id, attempt)| (*id, *attempt)).collect()
    }
}

/// Drops the entry when execution ends, including when the tick is aborted.
struct InFlightGuard {
    in_flight: InFlight,
    id: Uuid,
    attempt: i32,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut map = self.in_flight.lock();
        if map.get(&self.id) == Some(&self.attempt) {
            map.remove(&self.id);
        }
    }
}

/// Claims at most one eligible job per tick and hands it to the executor.
#[derive(Clone)]
pub struct ClaimScheduler {
    store: SharedStore,
    executor: Executor,
    clock: Arc<dyn Clock>,
    cfg: PollerConfig,
    in_flight: InFlight,
}

impl ClaimScheduler {
    pub fn new(
        store: SharedStore,
        executor: Executor,
        clock: Arc<dyn Clock>,
        cfg: PollerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            clock,
            cfg,
            in_flight: InFlight::default(),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.cfg
    }

    /// Walk the candidates in claim order; the first CAS that sticks wins.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        let now = self.clock.now();
        let candidates = self.store.eligible(now, self.cfg.candidate_batch).await?;
        let lease_until = self.lease_until(now);

        for candidate in candidates {
            match self
                .store
                .try_claim(candidate.id, &self.cfg.worker_id, now, lease_until)
                .await?
            {
                Some(job) => {
                    tracing::info!(
                        job_id = %job.id,
                        task_kind = %job.task_kind,
                        attempt = job.attempt,
                        worker_id = %self.cfg.worker_id,
                        "job claimed"
                    );
                    return Ok(Some(job));
                }
                None => {
                    tracing::debug!(job_id = %candidate.id, "claim lost, trying next candidate");
                }
            }
        }

        Ok(None)
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        let Some(job) = self.claim_next().await? else {
            return Ok(TickOutcome::Idle);
        };

        let job_id = job.id;
        let _tracked = self.in_flight.track(&job);
        let outcome = self.executor.execute(job).await?;
        Ok(TickOutcome::Executed { job_id, outcome })
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.cfg.lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(300))
    }

    /// Extend the lease of every job this process is still executing.
    /// Returns how many leases were extended.
    pub async fn renew_leases(&self) -> Result<u64> {
        let now = self.clock.now();
        let lease_until = self.lease_until(now);

        let mut renewed = 0;
        for (id, attempt) in self.in_flight.snapshot() {
            if self.store.extend_lease(id, attempt, lease_until, now).await? {
                renewed += 1;
            } else {
                tracing::debug!(job_id = %id, attempt, "lease renewal found the attempt gone");
            }
        }
        Ok(renewed)
    }

    /// Renew our own leases, then fail every STARTED job whose lease has run
    /// out. Returns how many were recovered.
    pub async fn reap_expired(&self) -> Result<u64> {
        self.renew_leases().await?;

        let now = self.clock.now();
        let expired = self.store.expired_leases(now, self.cfg.reap_batch).await?;

        let mut recovered = 0;
        for job in expired {
            let outcome = self.executor.recover_expired(&job).await?;
            if outcome != ExecutionOutcome::Superseded {
                tracing::warn!(job_id = %job.id, attempt = job.attempt, ?outcome, "reaped expired lease");
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}
