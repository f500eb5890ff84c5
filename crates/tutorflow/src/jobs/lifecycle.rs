use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::jobs::scheduler::{ClaimScheduler, TickOutcome};

struct Running {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the background poll loops and the lease reaper.
///
/// Nothing here is global: every controller has its own loops, so several
/// queues can live in one process.
pub struct LifecycleController {
    scheduler: ClaimScheduler,
    wake: Arc<Notify>,
    reap_interval: Duration,
    drain_timeout: Duration,
    running: Mutex<Option<Running>>,
}

impl LifecycleController {
    pub fn new(
        scheduler: ClaimScheduler,
        wake: Arc<Notify>,
        reap_interval: Duration,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            scheduler,
            wake,
            reap_interval,
            drain_timeout,
            running: Mutex::new(None),
        }
    }

    /// Returns `false` if the loops were already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }

        let (tx, rx) = watch::channel(false);
        let concurrency = self.scheduler.config().concurrency.max(1);
        let mut handles = Vec::with_capacity(concurrency + 1);

        for n in 0..concurrency {
            handles.push(tokio::spawn(poll_loop(
                self.scheduler.clone(),
                self.wake.clone(),
                rx.clone(),
                n,
            )));
        }
        handles.push(tokio::spawn(reap_loop(
            self.scheduler.clone(),
            self.reap_interval,
            rx,
        )));

        tracing::info!(
            worker_id = %self.scheduler.config().worker_id,
            concurrency,
            interval_ms = self.scheduler.config().interval.as_millis() as u64,
            "queue started"
        );
        *running = Some(Running {
            shutdown: tx,
            handles,
        });
        true
    }

    /// Let every loop finish its current tick, then return. After
    /// `drain_timeout` the stragglers are aborted along with the handlers they
    /// are running; those jobs stay STARTED until their lease is reaped.
    /// Returns `false` if nothing was running.
    pub async fn stop(&self) -> bool {
        let Some(Running {
            shutdown,
            mut handles,
        }) = self.running.lock().await.take()
        else {
            return false;
        };

        let _ = shutdown.send(true);

        let drained = timeout(self.drain_timeout, async {
            for handle in handles.iter_mut() {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "poll loop ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                drain_timeout_ms = self.drain_timeout.as_millis() as u64,
                "drain timed out, aborting in-flight work"
            );
            for handle in &handles {
                handle.abort();
            }
        }

        tracing::info!(worker_id = %self.scheduler.config().worker_id, "queue stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

async fn poll_loop(
    scheduler: ClaimScheduler,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    n: usize,
) {
    let interval = scheduler.config().interval;
    loop {
        if *shutdown.borrow() {
            break;
        }

        match scheduler.tick().await {
            Ok(TickOutcome::Executed { job_id, outcome }) => {
                tracing::debug!(poller = n, %job_id, ?outcome, "tick executed job");
            }
            Ok(TickOutcome::Idle) => {}
            Err(e) => {
                tracing::warn!(poller = n, error = %e, "poll tick failed, retrying next tick");
            }
        }

        tokio::select! {
            _ = sleep(interval) => {}
            _ = wake.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!(poller = n, "poll loop exited");
}

async fn reap_loop(
    scheduler: ClaimScheduler,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        match scheduler.reap_expired().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(recovered = n, "reaped expired leases"),
            Err(e) => tracing::warn!(error = %e, "lease reap failed"),
        }
    }
}
